//! Cache keys for requests.

use sha2::{Digest, Sha256};

use crate::http::Method;

/// Stable, fixed-length key for a method + URL pair.
///
/// The fragment never reaches the server, so it is not part of the key.
pub fn request_key(method: &Method, url: &str) -> String {
  let input = format!("{} {}", method.as_str(), normalize_url(url));

  // SHA256 hash for stable, fixed-length keys
  let mut hasher = Sha256::new();
  hasher.update(input.as_bytes());
  hex::encode(hasher.finalize())
}

fn normalize_url(url: &str) -> String {
  match url::Url::parse(url) {
    Ok(mut parsed) => {
      parsed.set_fragment(None);
      parsed.to_string()
    }
    Err(_) => url.split('#').next().unwrap_or_default().to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_key_ignores_fragment() {
    assert_eq!(
      request_key(&Method::GET, "http://h/index.html#top"),
      request_key(&Method::GET, "http://h/index.html")
    );
  }

  #[test]
  fn test_key_distinguishes_method_and_query() {
    let base = request_key(&Method::GET, "http://h/api/habitaciones?piso=1");
    assert_ne!(base, request_key(&Method::POST, "http://h/api/habitaciones?piso=1"));
    assert_ne!(base, request_key(&Method::GET, "http://h/api/habitaciones?piso=2"));
    assert_eq!(base.len(), 64);
  }
}

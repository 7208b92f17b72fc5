use crate::config::Credentials;
use crate::exchange::ExchangeError;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signs private Bitget requests
///
/// Signature = base64(HMAC-SHA256(secret, timestamp + METHOD + path [+ "?" + query] + body))
#[derive(Clone)]
pub struct RequestSigner {
    credentials: Credentials,
}

impl RequestSigner {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }

    fn prehash(timestamp: i64, method: &str, path: &str, query: &str, body: &str) -> String {
        if query.is_empty() {
            format!("{}{}{}{}", timestamp, method.to_uppercase(), path, body)
        } else {
            format!("{}{}{}?{}{}", timestamp, method.to_uppercase(), path, query, body)
        }
    }

    fn sign(&self, message: &str) -> Result<String, ExchangeError> {
        let mut mac = HmacSha256::new_from_slice(self.credentials.secret.as_bytes())
            .map_err(|e| ExchangeError::Signing(format!("HMAC init failed: {}", e)))?;
        mac.update(message.as_bytes());
        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }

    /// Authentication headers for a request made at `timestamp` (ms since epoch)
    pub fn headers(
        &self,
        timestamp: i64,
        method: &str,
        path: &str,
        query: &str,
        body: &str,
    ) -> Result<HeaderMap, ExchangeError> {
        let signature = self.sign(&Self::prehash(timestamp, method, path, query, body))?;

        let mut headers = HeaderMap::new();
        headers.insert("ACCESS-KEY", header_value(&self.credentials.api_key)?);
        headers.insert("ACCESS-SIGN", header_value(&signature)?);
        headers.insert("ACCESS-TIMESTAMP", header_value(&timestamp.to_string())?);
        headers.insert("ACCESS-PASSPHRASE", header_value(&self.credentials.passphrase)?);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("locale", HeaderValue::from_static("en-US"));
        Ok(headers)
    }
}

fn header_value(value: &str) -> Result<HeaderValue, ExchangeError> {
    HeaderValue::from_str(value)
        .map_err(|e| ExchangeError::Signing(format!("Invalid header value: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer(secret: &str) -> RequestSigner {
        RequestSigner::new(Credentials {
            api_key: "key".to_string(),
            secret: secret.to_string(),
            passphrase: "pass".to_string(),
        })
    }

    #[test]
    fn test_prehash_with_and_without_query() {
        assert_eq!(
            RequestSigner::prehash(1, "get", "/api/x", "a=1&b=2", ""),
            "1GET/api/x?a=1&b=2"
        );
        assert_eq!(
            RequestSigner::prehash(1, "POST", "/api/x", "", "{\"a\":1}"),
            "1POST/api/x{\"a\":1}"
        );
    }

    #[test]
    fn test_hmac_known_vector() {
        let sig = signer("key")
            .sign("The quick brown fox jumps over the lazy dog")
            .unwrap();
        assert_eq!(sig, "97yD9DBThCSxMpjmqm+xQ+9NWaFJRhdZl0edvC0aPNg=");
    }

    #[test]
    fn test_headers() {
        let headers = signer("secret")
            .headers(
                1_700_000_000_000,
                "GET",
                "/api/mix/v1/market/contracts",
                "productType=umcbl",
                "",
            )
            .unwrap();

        assert_eq!(headers["ACCESS-KEY"], "key");
        assert_eq!(headers["ACCESS-PASSPHRASE"], "pass");
        assert_eq!(headers["ACCESS-TIMESTAMP"], "1700000000000");
        assert_eq!(
            headers["ACCESS-SIGN"],
            "rESlXDXWFhh2W9kDcgm7NvIMi4/HhXLTKi6LhjvfEOE="
        );
    }
}

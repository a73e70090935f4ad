/// Outbound alert mail via Aliyun DirectMail.
///
/// Disabled unless the process was started with `--mail`; every send is
/// best-effort and failures are only logged. Subjects carry the configured
/// label as a prefix so fleets of indexers can share one inbox.
use chrono::Utc;
use hmac::{Hmac, Mac};
use once_cell::sync::OnceCell;
use rand::Rng;
use sha1::Sha1;
use tracing::{error, warn};

use crate::config::{self, AliyunMailConfig};
use crate::error::{IndexerError, Result};

const ENDPOINT: &str = "https://dm.aliyuncs.com/";

static MAIL_CLIENT: OnceCell<Option<MailClient>> = OnceCell::new();

struct MailClient {
    cfg: AliyunMailConfig,
    http: reqwest::Client,
}

/// Validates the mail section and builds the client when alerts are enabled.
pub fn init(enabled: bool) -> Result<()> {
    let client = if enabled {
        let cfg = config::mail_config().ok_or_else(|| {
            IndexerError::Config("aliyun_mail config is required when mail is enabled".to_string())
        })?;
        config::validate_mail(cfg)?;
        Some(MailClient {
            cfg: cfg.clone(),
            http: reqwest::Client::new(),
        })
    } else {
        None
    };

    MAIL_CLIENT
        .set(client)
        .map_err(|_| IndexerError::Config("mail already initialized".to_string()))?;
    Ok(())
}

fn client() -> Option<&'static MailClient> {
    MAIL_CLIENT.get().and_then(|c| c.as_ref())
}

/// Sends a notification mail to the configured receivers. No-op when mail is
/// disabled.
pub async fn send_notify(subject: &str, content: &str) {
    let Some(client) = client() else {
        return;
    };

    if content.is_empty() {
        warn!("mail content cannot be empty");
        return;
    }

    let label = config::label();
    let subject = if label.is_empty() {
        subject.to_string()
    } else {
        format!("[{}] {}", label, subject)
    };

    if let Err(e) = client.single_send_mail(&subject, content).await {
        error!(error = %e, "failed to send mail");
    }
}

impl MailClient {
    async fn single_send_mail(&self, subject: &str, body: &str) -> Result<()> {
        let nonce: u64 = rand::thread_rng().gen();
        let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();

        let mut params: Vec<(String, String)> = vec![
            ("Action".into(), "SingleSendMail".into()),
            ("AccountName".into(), self.cfg.account_name.clone()),
            ("ReplyToAddress".into(), "false".into()),
            ("AddressType".into(), "1".into()),
            ("Subject".into(), subject.into()),
            ("TextBody".into(), body.into()),
            ("ToAddress".into(), self.cfg.receiver.join(",")),
            ("RegionId".into(), self.cfg.region.clone()),
            ("Format".into(), "JSON".into()),
            ("Version".into(), "2015-11-23".into()),
            ("AccessKeyId".into(), self.cfg.access_key_id.clone()),
            ("SignatureMethod".into(), "HMAC-SHA1".into()),
            ("SignatureVersion".into(), "1.0".into()),
            ("SignatureNonce".into(), nonce.to_string()),
            ("Timestamp".into(), timestamp),
        ];

        let signature = sign(&params, &self.cfg.access_key_secret)?;
        params.push(("Signature".into(), signature));

        let resp = self.http.post(ENDPOINT).form(&params).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(IndexerError::Other(format!(
                "mail api returned {}: {}",
                status, text
            )));
        }
        Ok(())
    }
}

/// Aliyun RPC-style request signature: percent-encoded sorted query string,
/// HMAC-SHA1 over "POST&%2F&<query>", base64-encoded.
fn sign(params: &[(String, String)], secret: &str) -> Result<String> {
    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let canonical = sorted
        .iter()
        .map(|(k, v)| format!("{}={}", percent_encode(k), percent_encode(v)))
        .collect::<Vec<_>>()
        .join("&");

    let string_to_sign = format!("POST&%2F&{}", percent_encode(&canonical));

    let mut mac = Hmac::<Sha1>::new_from_slice(format!("{}&", secret).as_bytes())
        .map_err(|e| IndexerError::Other(format!("invalid hmac key: {}", e)))?;
    mac.update(string_to_sign.as_bytes());
    Ok(base64::encode(mac.finalize().into_bytes()))
}

/// RFC 3986 percent-encoding with Aliyun's tweaks (space as %20, '~' kept).
fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_encode() {
        assert_eq!(percent_encode("abc-_.~XYZ09"), "abc-_.~XYZ09");
        assert_eq!(percent_encode("a b"), "a%20b");
        assert_eq!(percent_encode("a&b=c"), "a%26b%3Dc");
    }

    #[test]
    fn test_sign_is_deterministic() {
        let params = vec![
            ("B".to_string(), "2".to_string()),
            ("A".to_string(), "1".to_string()),
        ];
        let s1 = sign(&params, "secret").unwrap();
        let reordered = vec![
            ("A".to_string(), "1".to_string()),
            ("B".to_string(), "2".to_string()),
        ];
        let s2 = sign(&reordered, "secret").unwrap();
        assert_eq!(s1, s2);
        assert!(!s1.is_empty());
    }
}

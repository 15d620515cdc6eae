//! Direct client for the guild emoji endpoints.
//!
//! Emote routes get their own client instead of going through serenity's HTTP
//! layer. A long 429 on emoji creation is common, and the caller should be
//! told right away instead of having the request parked in a queue.

use std::sync::Arc;
use std::time::Duration;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::header::AUTHORIZATION;
use reqwest::{Method, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::common::{CreatedEmote, EmoteError, EmoteId, EmoteResult, GuildId};
use crate::image::ImageBlob;

use super::ratelimit::{GuildRateLimiter, VerbClass};

pub const DEFAULT_API_BASE_URL: &str = "https://discord.com/api/v10";

/// Waits shorter than this are slept off and the request retried.
const SHORT_RATE_LIMIT: Duration = Duration::from_secs(10);

const MAX_RATE_LIMIT_RETRIES: u32 = 5;

/// Error code for an image the API could not decode.
const INVALID_ASSET_CODE: u64 = 50046;

const AUDIT_LOG_REASON: &str = "X-Audit-Log-Reason";

/// Characters left alone when encoding audit log reasons.
const REASON_SAFE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b' ')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[derive(Debug, Deserialize)]
struct EmojiPayload {
    id: String,
    name: String,
    #[serde(default)]
    animated: bool,
}

impl EmojiPayload {
    fn into_emote(self) -> EmoteResult<CreatedEmote> {
        let id = self
            .id
            .parse()
            .map_err(|_| EmoteError::Fetch(format!("malformed emoji id '{}'", self.id)))?;
        Ok(CreatedEmote {
            id,
            name: self.name,
            animated: self.animated,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorPayload {
    code: Option<u64>,
    message: Option<String>,
    errors: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RateLimitPayload {
    /// Milliseconds.
    retry_after: f64,
}

pub struct EmoteClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    limiter: Arc<GuildRateLimiter>,
}

impl EmoteClient {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        token: impl Into<String>,
        limiter: Arc<GuildRateLimiter>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            limiter,
        }
    }

    /// Fail early if emote creation is rate limited for `guild`.
    pub fn check_create(&self, guild: GuildId) -> EmoteResult<()> {
        self.limiter.check_allowed(guild, VerbClass::Create)
    }

    pub fn check_delete(&self, guild: GuildId) -> EmoteResult<()> {
        self.limiter.check_allowed(guild, VerbClass::Delete)
    }

    pub async fn create(
        &self,
        guild: GuildId,
        name: &str,
        image: &ImageBlob,
        role_ids: &[u64],
        reason: Option<&str>,
    ) -> EmoteResult<CreatedEmote> {
        let roles: Vec<String> = role_ids.iter().map(u64::to_string).collect();
        let body = json!({
            "name": name,
            "image": image.to_data_url(),
            "roles": roles,
        });

        let path = format!("/guilds/{}/emojis", guild);
        let response = self
            .request(Method::POST, VerbClass::Create, &path, guild, Some(&body), reason)
            .await?;
        parse_emoji(response)
    }

    pub async fn delete(&self, guild: GuildId, emote: EmoteId, reason: Option<&str>) -> EmoteResult<()> {
        let path = format!("/guilds/{}/emojis/{}", guild, emote);
        self.request(Method::DELETE, VerbClass::Delete, &path, guild, None, reason)
            .await?;
        Ok(())
    }

    pub async fn rename(
        &self,
        guild: GuildId,
        emote: EmoteId,
        new_name: &str,
        reason: Option<&str>,
    ) -> EmoteResult<CreatedEmote> {
        let path = format!("/guilds/{}/emojis/{}", guild, emote);
        let body = json!({ "name": new_name });
        let response = self
            .request(Method::PATCH, VerbClass::Modify, &path, guild, Some(&body), reason)
            .await?;
        parse_emoji(response)
    }

    async fn request(
        &self,
        method: Method,
        verb: VerbClass,
        path: &str,
        guild: GuildId,
        body: Option<&Value>,
        reason: Option<&str>,
    ) -> EmoteResult<Value> {
        let url = format!("{}{}", self.base_url, path);
        let mut retries = 0;

        loop {
            self.limiter.check_allowed(guild, verb)?;

            let mut request = self
                .http
                .request(method.clone(), &url)
                .header(AUTHORIZATION, format!("Bot {}", self.token));
            if let Some(reason) = reason {
                request = request.header(AUDIT_LOG_REASON, encode_reason(reason));
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            debug!("{} {}", method, url);
            let response = request
                .send()
                .await
                .map_err(|e| EmoteError::Fetch(e.to_string()))?;
            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                let retry_after = retry_after(response).await;
                let retry_at = self.limiter.record_limited(guild, verb, retry_after);

                if retry_after < SHORT_RATE_LIMIT && retries < MAX_RATE_LIMIT_RETRIES {
                    retries += 1;
                    debug!("sleeping {:?} before retrying {} {}", retry_after, method, path);
                    tokio::time::sleep(retry_after).await;
                    continue;
                }

                warn!("guild {} rate limited on {} for {:?}", guild, verb, retry_after);
                return Err(EmoteError::RateLimited { retry_at });
            }

            if status.is_success() {
                if status == StatusCode::NO_CONTENT {
                    return Ok(Value::Null);
                }
                let text = response
                    .text()
                    .await
                    .map_err(|e| EmoteError::Fetch(e.to_string()))?;
                return Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)));
            }

            return Err(api_error(status, response).await);
        }
    }
}

pub fn encode_reason(reason: &str) -> String {
    utf8_percent_encode(reason, REASON_SAFE).to_string()
}

fn parse_emoji(value: Value) -> EmoteResult<CreatedEmote> {
    serde_json::from_value::<EmojiPayload>(value)
        .map_err(|e| EmoteError::Fetch(format!("unexpected emoji payload: {}", e)))?
        .into_emote()
}

async fn retry_after(response: Response) -> Duration {
    let millis = match response.json::<RateLimitPayload>().await {
        Ok(payload) => payload.retry_after,
        Err(e) => {
            warn!("429 without a usable retry_after: {}", e);
            1000.0
        }
    };
    if millis.is_finite() && millis > 0.0 {
        Duration::from_secs_f64(millis / 1000.0)
    } else {
        Duration::ZERO
    }
}

async fn api_error(status: StatusCode, response: Response) -> EmoteError {
    let text = response.text().await.unwrap_or_default();
    let payload = serde_json::from_str::<ApiErrorPayload>(&text).ok();

    let detail = match payload {
        Some(payload) if payload.code == Some(INVALID_ASSET_CODE) => return EmoteError::InvalidImage,
        Some(payload) if payload.message.is_some() || payload.errors.is_some() => {
            let mut lines: Vec<String> = payload.message.into_iter().collect();
            if let Some(errors) = &payload.errors {
                flatten_errors(errors, "", &mut lines);
            }
            lines.join("\n")
        }
        _ => text,
    };

    EmoteError::RemoteHttp {
        status: status.as_u16(),
        reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
        detail,
    }
}

/// Turn the nested `errors` object into `In field.path: message` lines.
fn flatten_errors(value: &Value, key: &str, out: &mut Vec<String>) {
    let Value::Object(map) = value else {
        return;
    };

    if let Some(Value::Array(errors)) = map.get("_errors") {
        let messages: Vec<&str> = errors
            .iter()
            .filter_map(|error| error.get("message")?.as_str())
            .collect();
        out.push(format!("In {}: {}", key, messages.join(" ")));
        return;
    }

    for (field, nested) in map {
        let path = if key.is_empty() {
            field.clone()
        } else {
            format!("{}.{}", key, field)
        };
        flatten_errors(nested, &path, out);
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    const GUILD: GuildId = 150662382874525696;

    fn client(server: &MockServer) -> EmoteClient {
        EmoteClient::new(
            reqwest::Client::new(),
            server.uri(),
            "t0ken",
            Arc::new(GuildRateLimiter::new()),
        )
    }

    fn gif() -> ImageBlob {
        ImageBlob::new(&b"GIF89a\x01\x00\x01\x00"[..]).unwrap()
    }

    fn emoji_json(id: &str, name: &str, animated: bool) -> Value {
        json!({ "id": id, "name": name, "animated": animated, "roles": [] })
    }

    #[test]
    fn test_encode_reason() {
        assert_eq!(
            encode_reason("Created by @io (140516693242937345)"),
            "Created by %40io %28140516693242937345%29"
        );
        assert_eq!(encode_reason("a/b ü"), "a/b %C3%BC");
    }

    #[test]
    fn test_flatten_errors() {
        let errors = json!({
            "image": { "_errors": [{ "code": "BINARY_TYPE_MAX_SIZE", "message": "File cannot be larger than 256.0 kb." }] },
        });
        let mut lines = Vec::new();
        flatten_errors(&errors, "", &mut lines);
        assert_eq!(lines, ["In image: File cannot be larger than 256.0 kb."]);

        let nested = json!({ "roles": { "0": { "_errors": [{ "message": "Unknown role" }] } } });
        let mut lines = Vec::new();
        flatten_errors(&nested, "", &mut lines);
        assert_eq!(lines, ["In roles.0: Unknown role"]);
    }

    #[tokio::test]
    async fn test_create_sends_data_url_and_reason() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/guilds/{}/emojis", GUILD)))
            .and(header("authorization", "Bot t0ken"))
            .and(header("x-audit-log-reason", "Created by %40io %281%29"))
            .and(body_partial_json(json!({
                "name": "blobcat",
                "image": "data:image/gif;base64,R0lGODlhAQABAA==",
            })))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(emoji_json("379127000398430219", "blobcat", true)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let emote = client(&server)
            .create(GUILD, "blobcat", &gif(), &[], Some("Created by @io (1)"))
            .await
            .unwrap();
        assert_eq!(emote.id, 379127000398430219);
        assert!(emote.animated);
    }

    #[tokio::test]
    async fn test_error_detail_is_flattened() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "code": 50035,
                "message": "Invalid Form Body",
                "errors": { "image": { "_errors": [{ "message": "File cannot be larger than 256.0 kb." }] } },
            })))
            .mount(&server)
            .await;

        match client(&server).create(GUILD, "big", &gif(), &[], None).await {
            Err(EmoteError::RemoteHttp {
                status,
                reason,
                detail,
            }) => {
                assert_eq!(status, 400);
                assert_eq!(reason, "Bad Request");
                assert_eq!(
                    detail,
                    "Invalid Form Body\nIn image: File cannot be larger than 256.0 kb."
                );
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_asset_maps_to_invalid_image() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(json!({ "code": 50046, "message": "Invalid Asset" })),
            )
            .mount(&server)
            .await;

        let result = client(&server).create(GUILD, "x", &gif(), &[], None).await;
        assert!(matches!(result, Err(EmoteError::InvalidImage)));
    }

    #[tokio::test]
    async fn test_short_rate_limit_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({ "retry_after": 50 })))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        client(&server).delete(GUILD, 42, None).await.unwrap();
    }

    #[tokio::test]
    async fn test_long_rate_limit_fails_and_is_remembered() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(429).set_body_json(json!({ "retry_after": 3_600_000 })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server);
        let result = client.create(GUILD, "x", &gif(), &[], None).await;
        assert!(matches!(result, Err(EmoteError::RateLimited { .. })));

        // Refused locally without another request.
        assert!(matches!(
            client.check_create(GUILD),
            Err(EmoteError::RateLimited { .. })
        ));
        assert!(client.check_delete(GUILD).is_ok());
    }

    #[tokio::test]
    async fn test_rename_patches_name() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path(format!("/guilds/{}/emojis/42", GUILD)))
            .and(body_partial_json(json!({ "name": "newname" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(emoji_json("42", "newname", false)))
            .expect(1)
            .mount(&server)
            .await;

        let emote = client(&server)
            .rename(GUILD, 42, "newname", Some("Renamed"))
            .await
            .unwrap();
        assert_eq!(emote.name, "newname");
        assert!(!emote.animated);
    }
}

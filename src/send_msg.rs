//! WeCom app message send API
//!
//! Endpoint: POST https://qyapi.weixin.qq.com/cgi-bin/message/send?access_token=ACCESS_TOKEN
//!
//! Only text messages are supported. Recipients are userids joined with `|`.
//! A non-zero `errcode` is a delivery failure; `invaliduser`, `invalidparty`
//! and `invalidtag` list targets the provider dropped.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::errors;
use crate::token::{Error, Result, WeComClient, redact_body};

/// Request body for message/send (text)
#[derive(Debug, Clone, Serialize)]
pub struct TextMessageRequest {
    /// Recipient userids joined with `|`
    pub touser: String,
    pub msgtype: &'static str,
    pub agentid: i64,
    pub text: TextContent,
    /// 0: shareable, 1: confidential
    pub safe: u8,
}

impl TextMessageRequest {
    pub fn new<S: AsRef<str>>(recipients: &[S], agentid: i64, content: impl Into<String>) -> Self {
        let touser = recipients
            .iter()
            .map(|r| r.as_ref())
            .collect::<Vec<_>>()
            .join("|");
        Self {
            touser,
            msgtype: "text",
            agentid,
            text: TextContent {
                content: content.into(),
            },
            safe: 0,
        }
    }
}

/// Text message content
#[derive(Debug, Clone, Serialize)]
pub struct TextContent {
    /// Up to 2048 bytes
    pub content: String,
}

/// Response for message/send
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SendMessageResponse {
    #[serde(default)]
    pub errcode: i64,
    #[serde(default)]
    pub errmsg: String,
    #[serde(default)]
    pub invaliduser: String,
    #[serde(default)]
    pub invalidparty: String,
    #[serde(default)]
    pub invalidtag: String,
}

impl SendMessageResponse {
    pub fn has_invalid_targets(&self) -> bool {
        !(self.invaliduser.is_empty() && self.invalidparty.is_empty() && self.invalidtag.is_empty())
    }
}

impl WeComClient {
    /// Call message/send with a text payload.
    #[instrument(level = "debug", skip(self, access_token, req))]
    pub async fn send_text(
        &self,
        access_token: &str,
        req: &TextMessageRequest,
    ) -> Result<SendMessageResponse> {
        if req.touser.is_empty() {
            return Err(Error::InvalidRequest("no recipients"));
        }
        let mut url = self.endpoint("/cgi-bin/message/send")?;
        url.query_pairs_mut()
            .append_pair("access_token", access_token);
        debug!(touser = %req.touser, agentid = req.agentid, "message/send request");

        let resp = self
            .http()
            .post(url)
            .json(req)
            .send()
            .await?
            .error_for_status()?;
        let status = resp.status().as_u16();
        let bytes = resp.bytes().await?;

        parse_send_response(status, &bytes)
    }
}

pub(crate) fn parse_send_response(status: u16, bytes: &[u8]) -> Result<SendMessageResponse> {
    let resp = serde_json::from_slice::<SendMessageResponse>(bytes).map_err(|de_err| {
        Error::Decode {
            status,
            error: de_err.to_string(),
            body: redact_body(bytes),
        }
    })?;

    if resp.errcode != 0 {
        warn!(
            errcode = resp.errcode,
            hint = errors::hint_for(resp.errcode),
            "message/send rejected by provider"
        );
        return Err(Error::Provider {
            code: resp.errcode,
            message: resp.errmsg,
        });
    }
    if resp.has_invalid_targets() {
        warn!(
            invaliduser = %resp.invaliduser,
            invalidparty = %resp.invalidparty,
            invalidtag = %resp.invalidtag,
            "message/send dropped some targets"
        );
    }
    Ok(resp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_body_layout() {
        let req = TextMessageRequest::new(&["fake"], 0, "Hello, fake.");
        let body = serde_json::to_string(&req).expect("serialize");
        assert_eq!(
            body,
            r#"{"touser":"fake","msgtype":"text","agentid":0,"text":{"content":"Hello, fake."},"safe":0}"#
        );
    }

    #[test]
    fn recipients_are_pipe_joined() {
        let users = vec!["alice".to_string(), "bob".to_string(), "carol".to_string()];
        let req = TextMessageRequest::new(users.as_slice(), 1000002, "hi");
        assert_eq!(req.touser, "alice|bob|carol");
    }

    #[test]
    fn provider_rejection_carries_errmsg() {
        let err = parse_send_response(200, br#"{"errcode":40014,"errmsg":"invalid access_token"}"#)
            .unwrap_err();
        assert_eq!(err.to_string(), "invalid access_token");
        assert_eq!(err.provider_code(), Some(40014));
    }

    #[test]
    fn partial_delivery_is_ok() {
        let resp = parse_send_response(
            200,
            br#"{"errcode":0,"errmsg":"ok","invaliduser":"ghost","invalidparty":"","invalidtag":""}"#,
        )
        .expect("ok");
        assert!(resp.has_invalid_targets());
        assert_eq!(resp.invaliduser, "ghost");
    }

    #[test]
    fn malformed_body_is_decode_error() {
        let err = parse_send_response(200, b"not json").unwrap_err();
        assert!(err.is_decode());
    }
}

//! WhatsApp Cloud API 集成
//!
//! 通过 Webhook 接收消息，交给 Dispatcher 处理后发送回复；按钮以编号列表附在文本末尾，
//! 用户回复编号或按钮文本均可。计时器产生的异步提示由 `forward_outbound` 转发。

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};

use crate::dispatcher::{render_plain, resolve_option, Dispatcher};
use crate::prompts::Prompt;

/// WhatsApp 服务状态
pub struct WhatsappState {
    pub dispatcher: Dispatcher,
    pub access_token: String,
    pub phone_number_id: String,
    pub api_base: String,
    pub verify_token: String,
    /// user_id -> 最近一次发送的按钮（用于解析编号回复）
    pub last_options: RwLock<HashMap<String, Vec<String>>>,
    pub client: reqwest::Client,
}

impl WhatsappState {
    pub fn new(
        dispatcher: Dispatcher,
        access_token: String,
        phone_number_id: String,
        api_base: String,
        verify_token: String,
    ) -> Self {
        Self {
            dispatcher,
            access_token,
            phone_number_id,
            api_base,
            verify_token,
            last_options: RwLock::new(HashMap::new()),
            client: reqwest::Client::new(),
        }
    }
}

/// Webhook 验证参数
#[derive(Debug, Deserialize)]
pub struct WebhookVerifyQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

/// WhatsApp Webhook 请求体（只解析需要的字段）
#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    pub object: Option<String>,
    pub entry: Option<Vec<WebhookEntry>>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookEntry {
    pub changes: Option<Vec<WebhookChange>>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookChange {
    pub value: Option<WebhookValue>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookValue {
    pub messages: Option<Vec<WebhookMessage>>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookMessage {
    pub from: String,
    #[serde(rename = "type")]
    pub msg_type: Option<String>,
    pub text: Option<WebhookText>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookText {
    pub body: String,
}

/// WhatsApp 发送消息 API 请求体
#[derive(Debug, Serialize)]
struct SendMessageRequest {
    messaging_product: String,
    to: String,
    #[serde(rename = "type")]
    msg_type: String,
    text: SendMessageText,
}

#[derive(Debug, Serialize)]
struct SendMessageText {
    body: String,
}

impl WebhookPayload {
    /// 提取所有文本消息 (from, body)
    pub fn text_messages(self) -> Vec<(String, String)> {
        if self.object.as_deref() != Some("whatsapp_business_account") {
            return Vec::new();
        }
        self.entry
            .into_iter()
            .flatten()
            .flat_map(|e| e.changes.into_iter().flatten())
            .filter_map(|c| c.value)
            .flat_map(|v| v.messages.into_iter().flatten())
            .filter(|m| m.msg_type.as_deref() == Some("text"))
            .filter_map(|m| m.text.map(|t| (m.from, t.body)))
            .collect()
    }
}

/// 创建 WhatsApp 路由
pub fn create_router(state: Arc<WhatsappState>) -> Router {
    Router::new()
        .route("/webhook", get(webhook_verify).post(webhook_receive))
        .route("/health", get(|| async { "OK" }))
        .with_state(state)
}

/// GET /webhook - Meta 验证 Webhook
async fn webhook_verify(
    State(state): State<Arc<WhatsappState>>,
    Query(query): Query<WebhookVerifyQuery>,
) -> Result<String, StatusCode> {
    if query.mode.as_deref() == Some("subscribe")
        && query.verify_token.as_deref() == Some(state.verify_token.as_str())
    {
        Ok(query.challenge.unwrap_or_default())
    } else {
        Err(StatusCode::FORBIDDEN)
    }
}

/// POST /webhook - 接收 WhatsApp 消息
async fn webhook_receive(
    State(state): State<Arc<WhatsappState>>,
    Json(payload): Json<WebhookPayload>,
) -> StatusCode {
    for (user_id, body) in payload.text_messages() {
        let text = {
            let last = state.last_options.read().await;
            let options = last.get(&user_id).cloned().unwrap_or_default();
            resolve_option(&options, &body).to_string()
        };

        for prompt in state.dispatcher.dispatch(&user_id, &text).await {
            deliver(&state, &prompt).await;
        }
    }

    StatusCode::OK
}

/// 把计时器产生的异步提示转发给用户，直到通道关闭
pub async fn forward_outbound(state: Arc<WhatsappState>, mut rx: mpsc::UnboundedReceiver<Prompt>) {
    while let Some(prompt) = rx.recv().await {
        deliver(&state, &prompt).await;
    }
    tracing::info!("Outbound prompt channel closed");
}

async fn deliver(state: &WhatsappState, prompt: &Prompt) {
    if !prompt.options.is_empty() {
        state
            .last_options
            .write()
            .await
            .insert(prompt.user_id.clone(), prompt.options.clone());
    }
    if let Err(e) = send_whatsapp_message(state, &prompt.user_id, &render_plain(prompt)).await {
        tracing::error!("Failed to send WhatsApp message to {}: {}", prompt.user_id, e);
    }
}

/// 通过 WhatsApp Cloud API 发送消息
async fn send_whatsapp_message(state: &WhatsappState, to: &str, body: &str) -> anyhow::Result<()> {
    let url = format!("{}/{}/messages", state.api_base, state.phone_number_id);
    let req = SendMessageRequest {
        messaging_product: "whatsapp".to_string(),
        to: to.replace('+', ""),
        msg_type: "text".to_string(),
        text: SendMessageText {
            body: body.to_string(),
        },
    };

    let resp = state
        .client
        .post(&url)
        .bearer_auth(&state.access_token)
        .json(&req)
        .send()
        .await?;

    if !resp.status().is_success() {
        let text = resp.text().await?;
        anyhow::bail!("WhatsApp API error: {}", text);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_messages_extraction() {
        let payload: WebhookPayload = serde_json::from_value(serde_json::json!({
            "object": "whatsapp_business_account",
            "entry": [{
                "id": "1",
                "changes": [{
                    "field": "messages",
                    "value": {
                        "messages": [
                            {"from": "+4912345", "type": "text", "text": {"body": "Begin"}},
                            {"from": "+4912345", "type": "image"}
                        ]
                    }
                }]
            }]
        }))
        .unwrap();

        assert_eq!(
            payload.text_messages(),
            vec![("+4912345".to_string(), "Begin".to_string())]
        );
    }

    #[test]
    fn test_other_objects_ignored() {
        let payload: WebhookPayload =
            serde_json::from_value(serde_json::json!({"object": "page", "entry": []})).unwrap();
        assert!(payload.text_messages().is_empty());
    }
}

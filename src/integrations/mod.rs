//! 外部集成：WhatsApp（需对应 feature 与公网 Webhook 域名）

#[cfg(feature = "whatsapp")]
pub mod whatsapp;

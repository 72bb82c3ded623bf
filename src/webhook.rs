//! Webhook transport: decodes platform XML deliveries into [`Inbound`]
//! messages and frames the router's text reply back as XML.
//!
//! Signature validation is intentionally not performed here; the platform's
//! plaintext mode is assumed, as the original deployment skipped validation.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::get;
use serde::Deserialize;
use tracing::{info, warn};

use crate::message::{Inbound, MsgKind};
use crate::router::Router;

/// Platform reply when there is nothing to say; suppresses retries.
const EMPTY_REPLY: &str = "success";

#[derive(Debug, Deserialize)]
struct WxMessage {
    #[serde(rename = "ToUserName")]
    to_user_name: String,
    #[serde(rename = "FromUserName")]
    from_user_name: String,
    #[serde(rename = "MsgType")]
    msg_type: String,
    #[serde(rename = "Content", default)]
    content: Option<String>,
    #[serde(rename = "MediaId", default)]
    media_id: Option<String>,
    #[serde(rename = "PicUrl", default)]
    pic_url: Option<String>,
    #[serde(rename = "Event", default)]
    event: Option<String>,
}

/// Build the HTTP application serving the webhook endpoint.
pub fn app(router: Arc<Router>) -> axum::Router {
    axum::Router::new()
        .route("/wx", get(verify).post(receive))
        .with_state(router)
}

/// Endpoint verification: the platform sends `echostr` and expects it back.
async fn verify(Query(params): Query<HashMap<String, String>>) -> String {
    params.get("echostr").cloned().unwrap_or_default()
}

async fn receive(State(router): State<Arc<Router>>, body: String) -> String {
    let msg = match decode(&body) {
        Ok(msg) => msg,
        Err(e) => {
            warn!("undecodable webhook delivery: {e}");
            return EMPTY_REPLY.to_string();
        }
    };

    let (to, from) = (msg.from_user_name.clone(), msg.to_user_name.clone());
    let inbound = to_inbound(msg);
    info!("inbound {:?} from {}", inbound.kind, inbound.sender_id);

    let reply = router.handle(inbound).await;
    if reply.is_empty() {
        return EMPTY_REPLY.to_string();
    }
    reply_xml(&to, &from, &reply)
}

fn decode(xml: &str) -> Result<WxMessage, String> {
    quick_xml::de::from_str(xml).map_err(|e| e.to_string())
}

fn to_inbound(msg: WxMessage) -> Inbound {
    let kind = MsgKind::from_platform(&msg.msg_type);
    let content = match kind {
        MsgKind::Event => msg.event.unwrap_or_default(),
        _ => msg.content.unwrap_or_default(),
    };
    Inbound {
        kind,
        sender_id: msg.from_user_name,
        content,
        media_id: msg.media_id,
        pic_url: msg.pic_url,
    }
}

/// Frame a text reply in the platform's XML envelope.
fn reply_xml(to_user: &str, from_user: &str, content: &str) -> String {
    let content = cdata_escape(content);
    let created = chrono::Utc::now().timestamp();
    format!(
        "<xml>\
         <ToUserName><![CDATA[{to_user}]]></ToUserName>\
         <FromUserName><![CDATA[{from_user}]]></FromUserName>\
         <CreateTime>{created}</CreateTime>\
         <MsgType><![CDATA[text]]></MsgType>\
         <Content><![CDATA[{content}]]></Content>\
         </xml>"
    )
}

/// A `]]>` inside the reply would terminate the CDATA section early; split it
/// across two sections.
fn cdata_escape(s: &str) -> String {
    s.replace("]]>", "]]]]><![CDATA[>")
}

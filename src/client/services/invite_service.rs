use async_trait::async_trait;
use rand::RngCore;
use url::Url;

/// Opaque invite token embedded in the share link and checked when the
/// invitee joins.
pub fn generate_invite_token() -> String {
    let uuid = uuid::Uuid::new_v4().to_string();
    let mut random = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut random);
    format!("{}-{:x}", uuid, md5::compute(random))
}

/// Shareable deep link: `<base>/?sessionId=<id>&token=<tok>`.
pub fn build_session_url(base: &str, session_id: &str, invite_token: &str) -> anyhow::Result<String> {
    let mut url = Url::parse(base)?;
    url.query_pairs_mut()
        .append_pair("sessionId", session_id)
        .append_pair("token", invite_token);
    Ok(url.to_string())
}

/// Parsed form of an incoming deep link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLink {
    pub session_id: String,
    pub invite_token: Option<String>,
}

/// Accepts both the current `?sessionId=<id>&token=<tok>` links and the
/// legacy `?meetPointId=<id>` form, which carries no token.
pub fn parse_session_link(link: &str) -> Option<SessionLink> {
    let url = Url::parse(link).ok()?;
    let mut session_id = None;
    let mut token = None;
    let mut legacy_id = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "sessionId" => session_id = Some(value.into_owned()),
            "token" => token = Some(value.into_owned()),
            "meetPointId" => legacy_id = Some(value.into_owned()),
            _ => {}
        }
    }
    match (session_id, legacy_id) {
        (Some(id), _) => Some(SessionLink {
            session_id: id,
            invite_token: token,
        }),
        (None, Some(id)) => Some(SessionLink {
            session_id: id,
            invite_token: None,
        }),
        (None, None) => None,
    }
}

/// Delivery side effect for the share link. The lifecycle treats dispatch
/// as fire-and-forget: a failure is logged and never blocks session
/// creation.
#[async_trait]
pub trait InviteDispatch: Send + Sync {
    async fn dispatch(&self, session_url: &str, recipient_hint: Option<&str>) -> anyhow::Result<()>;
}

/// Formats an `sms:` deep link for the platform share sheet.
pub struct SmsInvite;

#[async_trait]
impl InviteDispatch for SmsInvite {
    async fn dispatch(&self, session_url: &str, recipient_hint: Option<&str>) -> anyhow::Result<()> {
        let body = format!("Meet me halfway: {}", session_url);
        let encoded: String = url::form_urlencoded::byte_serialize(body.as_bytes()).collect();
        let sms_url = format!("sms:{}?&body={}", recipient_hint.unwrap_or(""), encoded);
        log::info!("[INVITE] SMS share link ready: {}", sms_url);
        Ok(())
    }
}

/// Log-only dispatcher for headless runs and tests.
pub struct LogInvite;

#[async_trait]
impl InviteDispatch for LogInvite {
    async fn dispatch(&self, session_url: &str, recipient_hint: Option<&str>) -> anyhow::Result<()> {
        match recipient_hint {
            Some(hint) => log::info!("[INVITE] Session link for {}: {}", hint, session_url),
            None => log::info!("[INVITE] Session link: {}", session_url),
        }
        Ok(())
    }
}

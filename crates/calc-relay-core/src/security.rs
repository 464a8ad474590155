use crate::{
    config::Config,
    domain::{ChatId, UserId},
};

// ============== Authorization ==============

pub fn is_authorized(user_id: Option<UserId>, allowed_users: &[i64]) -> bool {
    let Some(user_id) = user_id else {
        return false;
    };
    if allowed_users.is_empty() {
        return false;
    }
    allowed_users.contains(&user_id.0)
}

// ============== Access Gate ==============

/// Outcome of admitting a message: where its result should be relayed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Admission {
    pub source: ChatId,
    pub destination: ChatId,
}

/// Both axes must hold: the sender is an operator and the chat is wired for relay.
///
/// Rejection is silent; ordinary chat traffic from everyone else passes
/// through untouched.
pub fn admit(cfg: &Config, sender: Option<UserId>, source: ChatId) -> Option<Admission> {
    if !is_authorized(sender, &cfg.admins) {
        return None;
    }
    let destination = cfg.destination_for(source)?;
    Some(Admission {
        source,
        destination,
    })
}

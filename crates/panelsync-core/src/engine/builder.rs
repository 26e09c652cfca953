// Builders from domain records to engine specs.

use tracing::warn;
use uuid::Uuid;

use super::{Account, EngineUser, InboundSpec, OutboundSpec};
use crate::error::CoreError;
use crate::model::{NodeInfo, ProtocolSettings, Tag, UserInfo};

fn is_wildcard(listen_ip: &str) -> bool {
    matches!(listen_ip, "" | "0.0.0.0" | "::")
}

pub fn build_inbound(info: &NodeInfo, tag: &Tag, listen_ip: &str) -> InboundSpec {
    InboundSpec {
        tag: tag.clone(),
        listen_ip: listen_ip.to_owned(),
        port: info.port,
        enable_tls: info.enable_tls,
        protocol: info.protocol.clone(),
    }
}

pub fn build_outbound(tag: &Tag, listen_ip: &str) -> OutboundSpec {
    OutboundSpec {
        tag: tag.clone(),
        send_through: (!is_wildcard(listen_ip)).then(|| listen_ip.to_owned()),
    }
}

fn parse_uuid(user: &UserInfo) -> Result<Uuid, CoreError> {
    let raw = user.uuid.as_deref().ok_or_else(|| CoreError::InvalidUser {
        uid: user.uid,
        message: "missing uuid".into(),
    })?;
    Uuid::parse_str(raw).map_err(|e| CoreError::InvalidUser {
        uid: user.uid,
        message: format!("bad uuid: {e}"),
    })
}

fn require_password(user: &UserInfo) -> Result<String, CoreError> {
    user.password.clone().ok_or_else(|| CoreError::InvalidUser {
        uid: user.uid,
        message: "missing password".into(),
    })
}

/// Map one user to its engine credential for the node's protocol.
pub fn build_user(info: &NodeInfo, tag: &Tag, user: &UserInfo) -> Result<EngineUser, CoreError> {
    let account = match &info.protocol {
        ProtocolSettings::V2ray(v) if v.enable_vless => Account::Vless {
            id: parse_uuid(user)?,
        },
        ProtocolSettings::V2ray(v) => {
            let raw = user.alter_id.unwrap_or_else(|| i64::from(v.alter_id));
            let alter_id = u16::try_from(raw).unwrap_or_else(|_| {
                warn!(uid = user.uid, alter_id = raw, "alter_id out of range, using 0");
                0
            });
            Account::Vmess {
                id: parse_uuid(user)?,
                alter_id,
            }
        }
        ProtocolSettings::Trojan(_) => Account::Trojan {
            password: require_password(user)?,
        },
        ProtocolSettings::Shadowsocks(ss) => Account::Shadowsocks {
            cipher: ss.cipher.clone(),
            password: require_password(user)?,
        },
    };
    Ok(EngineUser {
        tag: user.engine_tag(tag),
        uid: user.uid,
        email: user.email.clone(),
        account,
    })
}

/// Users a batch mapped, alongside the panel records they came from.
#[derive(Debug, Default)]
pub struct BuiltUsers {
    pub engine: Vec<EngineUser>,
    /// Records that mapped. Skipped users are left out so a later fix
    /// shows up as an addition.
    pub accepted: Vec<UserInfo>,
}

/// Map a batch of users, skipping (and logging) the ones that cannot be
/// mapped.
pub fn build_users(info: &NodeInfo, tag: &Tag, users: &[UserInfo]) -> BuiltUsers {
    let mut built = BuiltUsers::default();
    for user in users {
        match build_user(info, tag, user) {
            Ok(engine_user) => {
                built.engine.push(engine_user);
                built.accepted.push(user.clone());
            }
            Err(e) => warn!(%tag, error = %e, "skipping user"),
        }
    }
    built
}

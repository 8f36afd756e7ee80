//! FCC lock handling.
//!
//! Locked modems boot with the radio disabled until the host answers a
//! challenge: the response is the first four bytes (little-endian) of
//! SHA-256 over the challenge's little-endian bytes followed by a fixed key.

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use xmmlink_rpc::{BodyBuilder, CallId, RpcClient};

use crate::commands::{int_at, reply_values};
use crate::error::{ModemError, Result};

const UNLOCK_KEY: [u8; 4] = [0x3d, 0xf8, 0xc7, 0x19];

/// How the lock was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnlockOutcome {
    /// Lock mode disabled; nothing to do.
    NotRequired,
    AlreadyUnlocked,
    /// Challenge answered and accepted.
    Unlocked,
}

/// Response to an unlock challenge.
pub fn challenge_response(challenge: u32) -> u32 {
    let mut hasher = Sha256::new();
    hasher.update(challenge.to_le_bytes());
    hasher.update(UNLOCK_KEY);
    let digest = hasher.finalize();
    u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Query the lock and answer the challenge if needed.
pub fn unlock(client: &RpcClient, timeout: std::time::Duration) -> Result<UnlockOutcome> {
    let call = CallId::CsiFccLockQueryReq;
    let reply = client.call_async(call, &[], timeout)?;
    let values = reply_values(call, &reply)?;
    let state = int_at(call, &values, 1)?;
    let mode = int_at(call, &values, 2)?;
    debug!(state, mode, "FCC lock status");

    if mode == 0 {
        return Ok(UnlockOutcome::NotRequired);
    }
    if state != 0 {
        return Ok(UnlockOutcome::AlreadyUnlocked);
    }

    let call = CallId::CsiFccLockGenChallengeReq;
    let reply = client.call_async(call, &[], timeout)?;
    let challenge = int_at(call, &reply_values(call, &reply)?, 1)?;

    let call = CallId::CsiFccLockVerChallengeReq;
    let body = BodyBuilder::new()
        .dword(challenge_response(challenge))
        .finish();
    let reply = client.call_async(call, &body, timeout)?;
    if int_at(call, &reply_values(call, &reply)?, 1)? != 1 {
        return Err(ModemError::UnlockFailed);
    }

    info!("FCC lock released");
    Ok(UnlockOutcome::Unlocked)
}

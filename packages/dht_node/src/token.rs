use chrono::{DateTime, TimeDelta, Utc};
use krpc_encoding::{encode_addr, InvalidData, NodeID, Token};
use num_bigint::BigUint;
use rand::RngCore;
use sha2::{Digest, Sha512};
use std::{collections::VecDeque, net::SocketAddrV4};

const SECRET_LEN: usize = 64;

/// Mints and checks the tokens that authorize `announce_peer`.
///
/// Nothing issued is remembered. A token is a digest over the querier's
/// id, the target id, the querier's endpoint, and a secret; holding a
/// short deque of recent secrets lets verification accept anything
/// generated within the token lifetime, and rotation plus pruning ages
/// everything else out.
pub struct TokenAuthority {
    secrets: VecDeque<Secret>,
    capacity: usize,
    secret_timeout: TimeDelta,
    token_timeout: TimeDelta,
}

struct Secret {
    created: DateTime<Utc>,
    bytes: [u8; SECRET_LEN],
}

impl Secret {
    fn random(created: DateTime<Utc>) -> Secret {
        let mut bytes = [0u8; SECRET_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Secret { created, bytes }
    }
}

impl TokenAuthority {
    pub fn new(secret_timeout: TimeDelta, token_timeout: TimeDelta) -> TokenAuthority {
        let secret_secs = secret_timeout.num_seconds().max(1);
        let capacity = (token_timeout.num_seconds() / secret_secs).max(1) as usize;

        TokenAuthority {
            secrets: VecDeque::with_capacity(capacity),
            capacity,
            secret_timeout,
            token_timeout,
        }
    }

    /// Mints the token for this querier/target/endpoint combination,
    /// rotating in a new secret when the current one has served its term.
    pub fn generate(
        &mut self,
        querier: &NodeID,
        target: &NodeID,
        address: SocketAddrV4,
        now: DateTime<Utc>,
    ) -> Result<Token, InvalidData> {
        self.prune(now);

        let rotation_due = self
            .secrets
            .front()
            .map_or(true, |secret| now - secret.created >= self.secret_timeout);
        if rotation_due {
            self.secrets.push_front(Secret::random(now));
            self.secrets.truncate(self.capacity);
        }

        hash_token(querier, target, address, &self.secrets[0])
    }

    /// Accepts a token iff some retained secret reproduces it.
    pub fn verify(
        &mut self,
        querier: &NodeID,
        target: &NodeID,
        address: SocketAddrV4,
        token: &Token,
        now: DateTime<Utc>,
    ) -> bool {
        self.prune(now);

        self.secrets
            .iter()
            .filter_map(|secret| hash_token(querier, target, address, secret).ok())
            .any(|expected| &expected == token)
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        while let Some(oldest) = self.secrets.back() {
            if now - oldest.created >= self.token_timeout {
                self.secrets.pop_back();
            } else {
                break;
            }
        }
    }
}

fn hash_token(
    querier: &NodeID,
    target: &NodeID,
    address: SocketAddrV4,
    secret: &Secret,
) -> Result<Token, InvalidData> {
    let mut digest = Sha512::new();
    digest.update(querier.encode()?);
    digest.update(target.encode()?);
    digest.update(encode_addr(&address));
    digest.update(secret.bytes);
    Ok(BigUint::from_bytes_be(&digest.finalize()))
}

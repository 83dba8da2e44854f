//! The account store boundary.
//!
//! StackClash does not own credential storage. The [`AccountStore`] trait
//! is the whole contract: check a username/password, create an account,
//! and apply a finished match to both players' records. Plug in a
//! database-backed store in production; [`MemoryAccountStore`] is enough
//! for tests and the bundled binary.

use std::collections::HashMap;
use std::future::Future;

use stackclash_protocol::{MatchRecord, PlayerStats, UserId, UserInfo};
use tokio::sync::Mutex;

use crate::SessionError;

/// Rating change applied to the winner of a match.
pub const RATING_WIN: i32 = 25;
/// Rating change applied to the loser of a match.
pub const RATING_LOSS: i32 = -15;

/// Minimum username length accepted by [`MemoryAccountStore`].
pub const MIN_USERNAME_LEN: usize = 3;
/// Minimum password length accepted by [`MemoryAccountStore`].
pub const MIN_PASSWORD_LEN: usize = 6;

/// Persistence for accounts and match results.
///
/// # Trait bounds
///
/// `Send + Sync + 'static` because one store is shared by every
/// connection task and the registry's reaper for the life of the server.
pub trait AccountStore: Send + Sync + 'static {
    /// Checks credentials and returns the account.
    ///
    /// # Errors
    /// [`SessionError::AuthFailed`] for an unknown user or wrong password.
    fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> impl Future<Output = Result<UserInfo, SessionError>> + Send;

    /// Creates an account with fresh stats.
    ///
    /// # Errors
    /// [`SessionError::UsernameTaken`] or [`SessionError::InvalidCredentials`].
    fn register(
        &self,
        username: &str,
        password: &str,
    ) -> impl Future<Output = Result<UserInfo, SessionError>> + Send;

    /// Applies a finished match. Returns the updated `(winner, loser)` stats.
    fn record_result(
        &self,
        record: &MatchRecord,
    ) -> impl Future<Output = Result<(PlayerStats, PlayerStats), SessionError>> + Send;
}

struct Account {
    user: UserInfo,
    password: String,
}

#[derive(Default)]
struct Accounts {
    by_name: HashMap<String, Account>,
    names: HashMap<UserId, String>,
    next_id: u64,
}

/// An [`AccountStore`] that keeps everything in memory.
///
/// Passwords are stored as given; this store is for tests and local play.
#[derive(Default)]
pub struct MemoryAccountStore {
    inner: Mutex<Accounts>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up an account by id.
    pub async fn user(&self, user_id: UserId) -> Option<UserInfo> {
        let accounts = self.inner.lock().await;
        let name = accounts.names.get(&user_id)?;
        accounts.by_name.get(name).map(|a| a.user.clone())
    }
}

impl AccountStore for MemoryAccountStore {
    async fn authenticate(&self, username: &str, password: &str) -> Result<UserInfo, SessionError> {
        let accounts = self.inner.lock().await;
        match accounts.by_name.get(username) {
            Some(account) if account.password == password => Ok(account.user.clone()),
            _ => {
                tracing::debug!(username, "login rejected");
                Err(SessionError::AuthFailed("invalid username or password".into()))
            }
        }
    }

    async fn register(&self, username: &str, password: &str) -> Result<UserInfo, SessionError> {
        if username.chars().count() < MIN_USERNAME_LEN {
            return Err(SessionError::InvalidCredentials(format!(
                "username must be at least {MIN_USERNAME_LEN} characters"
            )));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(SessionError::InvalidCredentials(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }

        let mut accounts = self.inner.lock().await;
        if accounts.by_name.contains_key(username) {
            return Err(SessionError::UsernameTaken(username.to_string()));
        }
        accounts.next_id += 1;
        let user = UserInfo {
            user_id: UserId(accounts.next_id),
            username: username.to_string(),
            stats: PlayerStats::default(),
        };
        accounts.names.insert(user.user_id, username.to_string());
        accounts.by_name.insert(
            username.to_string(),
            Account {
                user: user.clone(),
                password: password.to_string(),
            },
        );
        tracing::info!(user_id = %user.user_id, username, "account registered");
        Ok(user)
    }

    async fn record_result(
        &self,
        record: &MatchRecord,
    ) -> Result<(PlayerStats, PlayerStats), SessionError> {
        let mut accounts = self.inner.lock().await;
        let winner = apply(&mut accounts, record.winner, |stats| {
            stats.wins += 1;
            stats.rating += RATING_WIN;
        })?;
        let loser = apply(&mut accounts, record.loser, |stats| {
            stats.losses += 1;
            stats.rating += RATING_LOSS;
        })?;
        tracing::info!(
            room_id = %record.room_id,
            winner = %record.winner,
            loser = %record.loser,
            reason = %record.reason,
            "match result recorded"
        );
        Ok((winner, loser))
    }
}

fn apply(
    accounts: &mut Accounts,
    user_id: UserId,
    update: impl FnOnce(&mut PlayerStats),
) -> Result<PlayerStats, SessionError> {
    let name = accounts.names.get(&user_id).ok_or(SessionError::NotFound)?;
    let account = accounts
        .by_name
        .get_mut(name)
        .ok_or(SessionError::NotFound)?;
    update(&mut account.user.stats);
    Ok(account.user.stats)
}

#[cfg(test)]
mod tests {
    use stackclash_protocol::{MapId, MatchEndReason, RoomId};

    use super::*;

    #[tokio::test]
    async fn test_register_then_authenticate() {
        let store = MemoryAccountStore::new();
        let user = store.register("alice", "secret1").await.unwrap();
        assert_eq!(user.stats, PlayerStats::default());

        let again = store.authenticate("alice", "secret1").await.unwrap();
        assert_eq!(again.user_id, user.user_id);
    }

    #[tokio::test]
    async fn test_authenticate_wrong_password_fails() {
        let store = MemoryAccountStore::new();
        store.register("alice", "secret1").await.unwrap();
        assert!(matches!(
            store.authenticate("alice", "nope").await,
            Err(SessionError::AuthFailed(_))
        ));
        assert!(matches!(
            store.authenticate("nobody", "secret1").await,
            Err(SessionError::AuthFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_register_duplicate_name_is_taken() {
        let store = MemoryAccountStore::new();
        store.register("alice", "secret1").await.unwrap();
        assert!(matches!(
            store.register("alice", "other12").await,
            Err(SessionError::UsernameTaken(_))
        ));
    }

    #[tokio::test]
    async fn test_register_short_fields_rejected() {
        let store = MemoryAccountStore::new();
        assert!(matches!(
            store.register("al", "secret1").await,
            Err(SessionError::InvalidCredentials(_))
        ));
        assert!(matches!(
            store.register("alice", "123").await,
            Err(SessionError::InvalidCredentials(_))
        ));
    }

    #[tokio::test]
    async fn test_record_result_updates_both_players() {
        let store = MemoryAccountStore::new();
        let a = store.register("alice", "secret1").await.unwrap();
        let b = store.register("bob", "secret2").await.unwrap();

        let record = MatchRecord {
            room_id: RoomId(1),
            map: MapId::Standard,
            winner: a.user_id,
            loser: b.user_id,
            reason: MatchEndReason::KoLimit,
            duration_ms: 90_000,
            winner_kos: 3,
            loser_kos: 1,
        };
        let (winner, loser) = store.record_result(&record).await.unwrap();

        assert_eq!((winner.wins, winner.losses, winner.rating), (1, 0, 1025));
        assert_eq!((loser.wins, loser.losses, loser.rating), (0, 1, 985));
        assert_eq!(store.user(b.user_id).await.unwrap().stats, loser);
    }
}

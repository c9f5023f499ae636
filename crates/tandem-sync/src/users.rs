use async_stream::stream;
use chrono::Utc;
use futures_util::Stream;
use tracing::{info, warn};
use uuid::Uuid;

use tandem_db::models::UserRow;
use tandem_db::queries::is_constraint_violation;
use tandem_types::models::{ConversationId, Role, Sender, UserRecord};

use crate::error::SyncError;
use crate::role;
use crate::tree::{Tree, TreePath, from_millis, next_change, to_millis};

impl Tree {
    /// Create an account record. The password must already be hashed.
    pub async fn create_user(
        &self,
        name: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<UserRecord, SyncError> {
        let uid = Uuid::new_v4();
        let now = Utc::now();
        let (name, email, hash) = (name.to_string(), email.to_string(), password_hash.to_string());

        let record = UserRecord {
            uid,
            name: name.clone(),
            email: email.clone(),
            online: true,
            last_seen: Some(from_millis(to_millis(now))),
        };

        let created = self
            .blocking(move |db| {
                // the UNIQUE email column decides, so racing sign-ups cannot both win
                match db.create_user(&uid.to_string(), &name, &email, &hash, to_millis(now)) {
                    Ok(()) => Ok(true),
                    Err(e) if is_constraint_violation(&e) => Ok(false),
                    Err(e) => Err(e),
                }
            })
            .await?;

        if !created {
            return Err(SyncError::Conflict("email already registered".into()));
        }

        info!("Registered {} ({})", record.email, uid);
        self.publish(TreePath::User(uid));
        Ok(record)
    }

    /// The record and password hash for an email, if registered.
    pub async fn credentials(&self, email: &str) -> Result<Option<(UserRecord, String)>, SyncError> {
        let email = email.to_string();
        let row = self.blocking(move |db| db.get_user_by_email(&email)).await?;
        Ok(row.and_then(|row| {
            let hash = row.password.clone();
            user_from_row(row).map(|user| (user, hash))
        }))
    }

    pub async fn user(&self, uid: Uuid) -> Result<Option<UserRecord>, SyncError> {
        let row = self.blocking(move |db| db.get_user_by_id(&uid.to_string())).await?;
        Ok(row.and_then(user_from_row))
    }

    /// Every registered user, in registration order.
    pub async fn users(&self) -> Result<Vec<UserRecord>, SyncError> {
        let rows = self.blocking(|db| db.list_users()).await?;
        Ok(rows.into_iter().filter_map(user_from_row).collect())
    }

    /// Mark a user online and refresh their last-seen time.
    pub async fn set_online(&self, uid: Uuid) -> Result<(), SyncError> {
        self.set_presence(uid, true).await
    }

    /// Mark a user offline, recording now as their last-seen time.
    pub async fn set_offline(&self, uid: Uuid) -> Result<(), SyncError> {
        self.set_presence(uid, false).await
    }

    async fn set_presence(&self, uid: Uuid, online: bool) -> Result<(), SyncError> {
        let now = to_millis(Utc::now());
        let changed = self
            .blocking(move |db| db.set_presence(&uid.to_string(), online, now))
            .await?;
        if changed {
            self.publish(TreePath::User(uid));
        }
        Ok(())
    }

    /// Role of an authenticated email against the configured admin email.
    pub fn role_of(&self, email: &str) -> Role {
        role::classify(Some(email), self.admin_email())
    }

    /// Id of the admin account. Conversations cannot exist before it registers.
    pub async fn admin_id(&self) -> Result<Uuid, SyncError> {
        let email = self.admin_email().to_string();
        let row = self.blocking(move |db| db.get_user_by_email(&email)).await?;
        row.and_then(user_from_row)
            .map(|user| user.uid)
            .ok_or_else(|| SyncError::NotFound("admin account".into()))
    }

    /// The conversation between a plain user and the admin.
    pub async fn conversation_for(&self, user_id: Uuid) -> Result<ConversationId, SyncError> {
        let admin_id = self.admin_id().await?;
        if admin_id == user_id {
            return Err(SyncError::Validation("the admin has no conversation with itself".into()));
        }
        Ok(ConversationId::between(user_id, admin_id))
    }

    /// The conversation named by its non-admin participant `user_id`, and the
    /// side the caller writes as. Users reach only their own conversation;
    /// the admin reaches any.
    pub async fn conversation_access(
        &self,
        caller_id: Uuid,
        caller_email: &str,
        user_id: Uuid,
    ) -> Result<(ConversationId, Sender), SyncError> {
        let role = self.role_of(caller_email);
        let sender = match role.sender() {
            Some(sender) if role == Role::Admin || caller_id == user_id => sender,
            _ => {
                warn!("{} denied access to conversation of {}", caller_id, user_id);
                return Err(SyncError::Forbidden(format!(
                    "no access to the conversation of {}",
                    user_id
                )));
            }
        };
        Ok((self.conversation_for(user_id).await?, sender))
    }

    /// Full snapshot of the user set, now and after every user change.
    pub fn watch_users(&self) -> impl Stream<Item = Result<Vec<UserRecord>, SyncError>> + Send + 'static {
        let tree = self.clone();
        stream! {
            let mut rx = tree.subscribe();
            loop {
                yield tree.users().await;
                if next_change(&mut rx, |path| matches!(path, TreePath::User(_))).await.is_none() {
                    break;
                }
            }
        }
    }
}

fn user_from_row(row: UserRow) -> Option<UserRecord> {
    let uid = match row.id.parse::<Uuid>() {
        Ok(uid) => uid,
        Err(e) => {
            warn!("Corrupt user id '{}': {}", row.id, e);
            return None;
        }
    };
    Some(UserRecord {
        uid,
        name: row.name,
        email: row.email,
        online: row.online,
        last_seen: row.last_seen.map(from_millis),
    })
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;
    use tandem_db::Database;

    use super::*;

    fn tree() -> Tree {
        Tree::new(Database::open_in_memory().unwrap(), "admin@example.com")
    }

    #[tokio::test]
    async fn duplicate_registration_conflicts() {
        let tree = tree();
        tree.create_user("Ada", "ada@example.com", "h").await.unwrap();
        let err = tree.create_user("Ada", "ada@example.com", "h").await.unwrap_err();
        assert!(matches!(err, SyncError::Conflict(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_registrations_leave_one_account() {
        let tree = tree();
        let attempts: Vec<_> = (0..8)
            .map(|_| {
                let tree = tree.clone();
                tokio::spawn(async move { tree.create_user("Ada", "ada@example.com", "h").await })
            })
            .collect();

        let mut created = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(_) => created += 1,
                Err(e) => assert!(matches!(e, SyncError::Conflict(_)), "unexpected {:?}", e),
            }
        }
        assert_eq!(created, 1);
        assert_eq!(tree.users().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn presence_changes_reach_user_watchers() {
        let tree = tree();
        let ada = tree.create_user("Ada", "ada@example.com", "h").await.unwrap();

        let mut users = Box::pin(tree.watch_users());
        let first = users.next().await.unwrap().unwrap();
        assert!(first[0].online);

        tree.set_offline(ada.uid).await.unwrap();
        let second = users.next().await.unwrap().unwrap();
        assert!(!second[0].online);
        assert!(second[0].last_seen.is_some());
    }

    #[tokio::test]
    async fn conversation_needs_registered_admin() {
        let tree = tree();
        let ada = tree.create_user("Ada", "ada@example.com", "h").await.unwrap();
        assert!(matches!(tree.conversation_for(ada.uid).await, Err(SyncError::NotFound(_))));

        let admin = tree.create_user("Boss", "admin@example.com", "h").await.unwrap();
        let conversation = tree.conversation_for(ada.uid).await.unwrap();
        assert_eq!(conversation, ConversationId::between(admin.uid, ada.uid));
        assert!(tree.conversation_for(admin.uid).await.is_err());
    }
}

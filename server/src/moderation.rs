//! Admin and moderator rights derived from configured credentials

use crate::client_manager::Connection;
use crate::config::Config;
use crate::police::Police;
use base64::{engine::general_purpose::STANDARD, Engine};
use sha2::{Digest, Sha256};

/// Length of the base64 prefix kept as a trip
pub const TRIP_LEN: usize = 6;

#[derive(Debug, Clone, Default)]
pub struct ModerationPolicy {
    admin: String,
    password: Option<String>,
    salt: String,
    mods: Vec<String>,
}

impl ModerationPolicy {
    pub fn new(config: &Config) -> Self {
        Self {
            admin: config.admin.clone(),
            password: config.password.clone(),
            salt: config.salt.clone(),
            mods: config.mods.clone(),
        }
    }

    /// Derives the pseudonymous trip for a password.
    ///
    /// Short on purpose: trips mark a returning user, they do not
    /// authenticate anyone, and collisions are expected.
    pub fn trip_hash(&self, password: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(password.as_bytes());
        hasher.update(self.salt.as_bytes());
        let mut trip = STANDARD.encode(hasher.finalize());
        trip.truncate(TRIP_LEN);
        trip
    }

    /// Whether `nick` is the admin name, ignoring case
    pub fn is_admin_name(&self, nick: &str) -> bool {
        !self.admin.is_empty() && nick.eq_ignore_ascii_case(&self.admin)
    }

    /// Checks the password given with the admin nickname.
    ///
    /// Fails when no admin password is configured.
    pub fn admin_password_matches(&self, password: Option<&str>) -> bool {
        matches!((self.password.as_deref(), password), (Some(expected), Some(given)) if expected == given)
    }

    pub fn is_admin(&self, connection: &Connection) -> bool {
        !self.admin.is_empty() && connection.nick.as_deref() == Some(self.admin.as_str())
    }

    pub fn is_mod(&self, connection: &Connection) -> bool {
        if self.is_admin(connection) {
            return true;
        }
        connection
            .trip
            .as_ref()
            .is_some_and(|trip| self.mods.contains(trip))
    }

    /// Arrests the target's address. Moderators cannot be banned; returns
    /// false and changes nothing in that case.
    pub fn ban(&self, police: &mut Police, target: &Connection) -> bool {
        if self.is_mod(target) {
            return false;
        }
        police.arrest(&target.address);
        true
    }

    pub fn unban(&self, police: &mut Police, address: &str) {
        police.pardon(address);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn policy() -> ModerationPolicy {
        let config = Config {
            salt: "pepper".to_string(),
            admin: "root".to_string(),
            password: Some("hunter2".to_string()),
            ..Config::default()
        };
        let mut policy = ModerationPolicy::new(&config);
        let mod_trip = policy.trip_hash("modpass");
        policy.mods.push(mod_trip);
        policy
    }

    fn connection(nick: &str, trip: Option<String>) -> Connection {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut connection = Connection::new(1, "10.0.0.1".to_string(), tx);
        assert!(connection.join("lobby".to_string(), nick.to_string(), trip));
        connection
    }

    #[test]
    fn test_trip_hash_shape() {
        let policy = policy();
        let trip = policy.trip_hash("secret");
        assert_eq!(trip.len(), TRIP_LEN);
        assert_eq!(trip, policy.trip_hash("secret"));
        assert_ne!(trip, policy.trip_hash("other"));
    }

    #[test]
    fn test_trip_hash_depends_on_salt() {
        let salted = policy();
        let unsalted = ModerationPolicy::default();
        assert_ne!(salted.trip_hash("secret"), unsalted.trip_hash("secret"));
    }

    #[test]
    fn test_admin_name_and_password() {
        let policy = policy();
        assert!(policy.is_admin_name("ROOT"));
        assert!(!policy.is_admin_name("rooter"));
        assert!(policy.admin_password_matches(Some("hunter2")));
        assert!(!policy.admin_password_matches(Some("hunter3")));
        assert!(!policy.admin_password_matches(None));
    }

    #[test]
    fn test_no_admin_configured() {
        let policy = ModerationPolicy::default();
        assert!(!policy.is_admin_name(""));
        assert!(!policy.admin_password_matches(None));
        assert!(!policy.is_admin(&connection("anyone", None)));
    }

    #[test]
    fn test_admin_is_exact_nick_and_also_mod() {
        let policy = policy();
        let admin = connection("root", None);
        assert!(policy.is_admin(&admin));
        assert!(policy.is_mod(&admin));
        assert!(!policy.is_admin(&connection("Root", None)));
    }

    #[test]
    fn test_mod_by_trip() {
        let policy = policy();
        let moderator = connection("helper", Some(policy.trip_hash("modpass")));
        let user = connection("user", Some(policy.trip_hash("userpass")));
        assert!(policy.is_mod(&moderator));
        assert!(!policy.is_admin(&moderator));
        assert!(!policy.is_mod(&user));
        assert!(!policy.is_mod(&connection("anon", None)));
    }

    #[test]
    fn test_ban_refuses_moderators() {
        let policy = policy();
        let mut police = Police::default();
        let moderator = connection("helper", Some(policy.trip_hash("modpass")));

        assert!(!policy.ban(&mut police, &moderator));
        assert!(!police.is_arrested(&moderator.address));
    }

    #[test]
    fn test_ban_and_unban() {
        let policy = policy();
        let mut police = Police::default();
        let user = connection("spammer", None);

        assert!(policy.ban(&mut police, &user));
        assert!(police.is_arrested("10.0.0.1"));

        policy.unban(&mut police, "10.0.0.1");
        assert!(!police.is_arrested("10.0.0.1"));
    }
}

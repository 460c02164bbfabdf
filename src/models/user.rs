use serde::{Deserialize, Serialize};

/// Role that grants admin access.
pub const ADMIN_ROLE: &str = "admin";

/// Represents a user in the system.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// The user's username. Also the key in the user store.
    pub username: String,
    /// Argon2 PHC string.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password_hash: String,
    /// The user's email address.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,
    /// The user's full name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub real_name: String,
    /// The user's roles.
    #[serde(default)]
    pub roles: Vec<String>,
    /// Outstanding password reset nonce, if one was requested.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password_reset_nonce: String,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|r| r == ADMIN_ROLE)
    }

    /// A copy with the password hash and reset nonce cleared.
    pub fn without_secrets(&self) -> User {
        User {
            password_hash: String::new(),
            password_reset_nonce: String::new(),
            ..self.clone()
        }
    }
}

/// Username charset: letters, digits and `-._@+`.
pub fn is_valid_username(username: &str) -> bool {
    !username.is_empty()
        && username
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'@' | b'+'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_are_stripped() {
        let u = User {
            username: "alice".to_string(),
            password_hash: "$argon2id$...".to_string(),
            roles: vec![ADMIN_ROLE.to_string()],
            password_reset_nonce: "abcd".to_string(),
            ..Default::default()
        };
        let clean = u.without_secrets();
        assert!(clean.password_hash.is_empty());
        assert!(clean.password_reset_nonce.is_empty());
        assert!(clean.is_admin());

        let json = sonic_rs::to_string(&clean).unwrap();
        assert_eq!(json, r#"{"username":"alice","roles":["admin"]}"#);
    }

    #[test]
    fn username_charset() {
        assert!(is_valid_username("bob.smith+test@example.com"));
        assert!(!is_valid_username(""));
        assert!(!is_valid_username("../etc"));
        assert!(!is_valid_username("bob smith"));
    }
}

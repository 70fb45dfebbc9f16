//! Ownership information carried by every archive entry.

use serde::{Deserialize, Serialize};

/// Numeric ids and resolved names of the user and group owning an entry.
///
/// Names longer than the 32-byte ustar fields are cut when the header is encoded.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Owner {
    user_id: u32,
    user_name: String,
    group_id: u32,
    group_name: String,
}

impl Owner {
    pub fn new(user_id: u32, user_name: impl Into<String>, group_id: u32, group_name: impl Into<String>) -> Self {
        Self {
            user_id,
            user_name: user_name.into(),
            group_id,
            group_name: group_name.into(),
        }
    }

    pub fn user_id(&self) -> u32 {
        self.user_id
    }

    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    pub fn group_id(&self) -> u32 {
        self.group_id
    }

    pub fn group_name(&self) -> &str {
        &self.group_name
    }
}

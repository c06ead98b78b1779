use serde::{Deserialize, Serialize};

/// An employee entry managed through the employees API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    pub id: String,
    pub firstname: String,
    pub lastname: String,
}

impl Employee {
    /// Create an employee with a fresh UUID.
    pub fn new(firstname: &str, lastname: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            firstname: firstname.to_string(),
            lastname: lastname.to_string(),
        }
    }
}

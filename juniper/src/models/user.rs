use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::auth::{hash_password, verify_password};

use super::{require_text, FieldValue, Model, ModelError, Store, StoreError, Write};

pub const DEFAULT_ROLE: &str = "user";
pub const ADMIN_ROLE: &str = "administrator";

#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub username: String,
    /// Argon2 PHC string.
    #[serde(skip_serializing)]
    pub password: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login_at: DateTime<Utc>,
    pub forename: String,
    pub surname: String,
    pub birthdate: Option<NaiveDate>,
    #[serde(skip_serializing)]
    pub email_token: String,
    pub email_verified: bool,
    pub phone_number: String,
    pub phone_verified: bool,
    pub user_role: String,
}

/// JSON accepted by `POST /api/user` and `PUT /api/user/{id}`.
///
/// On update only the fields present are applied; a present `password` is
/// re-hashed.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInput {
    pub username: Option<String>,
    pub password: Option<String>,
    pub email: Option<String>,
    pub forename: Option<String>,
    pub surname: Option<String>,
    #[serde(alias = "phone")]
    pub phone_number: Option<String>,
    pub birthdate: Option<NaiveDate>,
    pub user_role: Option<String>,
    pub email_verified: Option<bool>,
    pub phone_verified: Option<bool>,
}

impl UserInput {
    fn changes_privileges(&self) -> bool {
        self.user_role.is_some() || self.email_verified.is_some() || self.phone_verified.is_some()
    }
}

impl User {
    /// A fresh, unsaved account with a hashed password.
    pub fn new(username: &str, password: &str, email: &str) -> Result<Self, ModelError> {
        let now = Utc::now();
        Ok(Self {
            id: 0,
            username: username.to_string(),
            password: hash_password(password)?,
            email: email.to_string(),
            created_at: now,
            updated_at: now,
            last_login_at: now,
            forename: String::new(),
            surname: String::new(),
            birthdate: None,
            email_token: String::new(),
            email_verified: false,
            phone_number: String::new(),
            phone_verified: false,
            user_role: String::from(DEFAULT_ROLE),
        })
    }

    pub fn check_password(&self, password: &str) -> bool {
        verify_password(password, &self.password)
    }

    /// Compares a token from a verification link with the stored hash.
    pub fn check_email_token(&self, token: &str) -> bool {
        !self.email_token.is_empty() && verify_password(token, &self.email_token)
    }

    pub fn is_admin(&self) -> bool {
        self.user_role == ADMIN_ROLE
    }

    pub fn display_name(&self) -> &str {
        if self.forename.is_empty() {
            &self.username
        } else {
            &self.forename
        }
    }
}

/// Email tokens are stored the same way passwords are.
pub fn hash_email_token(token: &str) -> Result<String, ModelError> {
    Ok(hash_password(token)?)
}

impl Store<User> {
    pub async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        self.find_one("username", username).await
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.find_one("email", email).await
    }

    /// Stamps `last_login_at` and returns the saved account.
    pub async fn record_login(&self, id: i64) -> Result<User, StoreError> {
        let mut user = self.read(id).await?;
        let now = Utc::now();
        user.last_login_at = now;
        user.updated_at = now;
        self.update(&user).await
    }
}

impl Model for User {
    type Input = UserInput;

    const NAME: &'static str = "User";
    const ROUTE: &'static str = "user";
    const TABLE: &'static str = "users";
    const COLUMNS: &'static [&'static str] = &[
        "username",
        "password",
        "email",
        "created_at",
        "updated_at",
        "last_login_at",
        "forename",
        "surname",
        "birthdate",
        "email_token",
        "email_verified",
        "phone_number",
        "phone_verified",
        "user_role",
    ];
    const PUBLIC_READ: bool = false;

    fn id(&self) -> i64 {
        self.id
    }

    fn values(&self) -> Vec<FieldValue> {
        vec![
            FieldValue::Text(self.username.clone()),
            FieldValue::Text(self.password.clone()),
            FieldValue::Text(self.email.clone()),
            FieldValue::Timestamp(self.created_at),
            FieldValue::Timestamp(self.updated_at),
            FieldValue::Timestamp(self.last_login_at),
            FieldValue::Text(self.forename.clone()),
            FieldValue::Text(self.surname.clone()),
            FieldValue::OptionalDate(self.birthdate),
            FieldValue::Text(self.email_token.clone()),
            FieldValue::Bool(self.email_verified),
            FieldValue::Text(self.phone_number.clone()),
            FieldValue::Bool(self.phone_verified),
            FieldValue::Text(self.user_role.clone()),
        ]
    }

    fn from_input(input: UserInput) -> Result<Self, ModelError> {
        let username = require_text("username", input.username.clone())?;
        let email = require_text("email", input.email.clone())?;
        let password = match input.password.clone() {
            Some(password) if !password.is_empty() => password,
            _ => return Err(ModelError::MissingField("password")),
        };

        let mut user = User::new(&username, &password, &email)?;
        user.apply(UserInput {
            username: None,
            password: None,
            email: None,
            ..input
        })?;
        Ok(user)
    }

    fn apply(&mut self, input: UserInput) -> Result<(), ModelError> {
        if let Some(username) = input.username {
            self.username = require_text("username", Some(username))?;
        }
        if let Some(password) = input.password {
            if password.is_empty() {
                return Err(ModelError::MissingField("password"));
            }
            self.password = hash_password(&password)?;
        }
        if let Some(email) = input.email {
            self.email = require_text("email", Some(email))?;
        }
        if let Some(forename) = input.forename {
            self.forename = forename;
        }
        if let Some(surname) = input.surname {
            self.surname = surname;
        }
        if let Some(phone_number) = input.phone_number {
            self.phone_number = phone_number;
        }
        if input.birthdate.is_some() {
            self.birthdate = input.birthdate;
        }
        if let Some(role) = input.user_role {
            self.user_role = require_text("userRole", Some(role))?;
        }
        if let Some(verified) = input.email_verified {
            self.email_verified = verified;
        }
        if let Some(verified) = input.phone_verified {
            self.phone_verified = verified;
        }
        Ok(())
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    /// Administrators manage every account. Everyone else may edit or delete
    /// their own, without touching role or verification flags.
    fn authorize(actor: &User, write: Write<'_, Self, UserInput>) -> Result<(), ModelError> {
        if actor.is_admin() {
            return Ok(());
        }
        match write {
            Write::Create(_) => Err(ModelError::Forbidden(
                "only administrators can create accounts",
            )),
            Write::Update(target, input) if target.id == actor.id => {
                if input.changes_privileges() {
                    Err(ModelError::Forbidden(
                        "only administrators can change roles or verification flags",
                    ))
                } else {
                    Ok(())
                }
            }
            Write::Delete(target) if target.id == actor.id => Ok(()),
            _ => Err(ModelError::Forbidden(
                "accounts can only be changed by their owner",
            )),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::{hash_email_token, User, UserInput, ADMIN_ROLE, DEFAULT_ROLE};
    use crate::db;
    use crate::models::{Model, ModelError, Store, Write};

    fn input(username: &str, password: &str, email: &str) -> UserInput {
        UserInput {
            username: Some(username.to_string()),
            password: Some(password.to_string()),
            email: Some(email.to_string()),
            ..UserInput::default()
        }
    }

    #[test]
    fn from_input_hashes_password_and_defaults_role() {
        let user = User::from_input(input("alice", "hunter2", "alice@example.org")).unwrap();

        assert_eq!(user.username, "alice");
        assert_ne!(user.password, "hunter2");
        assert!(user.check_password("hunter2"));
        assert!(!user.check_password("hunter3"));
        assert_eq!(user.user_role, DEFAULT_ROLE);
        assert!(!user.email_verified);
    }

    #[test]
    fn from_input_requires_credentials() {
        let missing = User::from_input(UserInput {
            username: Some(String::from("bob")),
            ..UserInput::default()
        });
        assert!(matches!(missing, Err(ModelError::MissingField("email"))));

        let blank = User::from_input(input("  ", "pw", "bob@example.org"));
        assert!(matches!(blank, Err(ModelError::MissingField("username"))));
    }

    #[test]
    fn apply_only_touches_present_fields() {
        let mut user = User::from_input(input("carol", "pw", "carol@example.org")).unwrap();
        let previous_hash = user.password.clone();

        user.apply(UserInput {
            forename: Some(String::from("Carol")),
            ..UserInput::default()
        })
        .unwrap();

        assert_eq!(user.forename, "Carol");
        assert_eq!(user.email, "carol@example.org");
        assert_eq!(user.password, previous_hash);
        assert_eq!(user.display_name(), "Carol");
    }

    #[test]
    fn serialized_user_hides_secrets() {
        let mut user = User::from_input(input("dave", "pw", "dave@example.org")).unwrap();
        user.email_token = hash_email_token("token").unwrap();

        let json = serde_json::to_value(&user).unwrap();

        assert!(json.get("password").is_none());
        assert!(json.get("emailToken").is_none());
        assert_eq!(json["username"], "dave");
        assert_eq!(json["userRole"], "user");
        assert!(json.get("lastLoginAt").is_some());
    }

    #[test]
    fn email_token_round_trips_through_hash() {
        let mut user = User::from_input(input("erin", "pw", "erin@example.org")).unwrap();
        assert!(!user.check_email_token("anything"));

        user.email_token = hash_email_token("abc123").unwrap();
        assert!(user.check_email_token("abc123"));
        assert!(!user.check_email_token("abc124"));
    }

    #[test]
    fn values_follow_column_order() {
        let user = User::from_input(input("frank", "pw", "frank@example.org")).unwrap();
        assert_eq!(user.values().len(), User::COLUMNS.len());
    }

    #[tokio::test]
    async fn lookup_and_login_stamp() -> anyhow::Result<()> {
        let pool = db::connect_in_memory().await?;
        db::migrate(&pool).await?;
        let users: Store<User> = Store::new(pool);

        let created = users
            .create(&User::from_input(input("gina", "pw", "gina@example.org")).unwrap())
            .await?;
        assert!(users.find_by_username("nobody").await?.is_none());
        let found = users.find_by_email("gina@example.org").await?.unwrap();
        assert_eq!(found.id, created.id);

        let stamped = users.record_login(created.id).await?;
        assert!(stamped.last_login_at >= created.last_login_at);
        assert_eq!(
            users.find_by_username("gina").await?.unwrap().last_login_at,
            stamped.last_login_at
        );
        Ok(())
    }

    #[tokio::test]
    async fn usernames_are_unique() -> anyhow::Result<()> {
        let pool = db::connect_in_memory().await?;
        db::migrate(&pool).await?;
        let users: Store<User> = Store::new(pool);

        users
            .create(&User::from_input(input("hank", "pw", "hank@example.org")).unwrap())
            .await?;
        let err = users
            .create(&User::from_input(input("hank", "pw", "other@example.org")).unwrap())
            .await
            .unwrap_err();
        assert!(err.is_unique_violation());
        assert_eq!(users.count().await?, 1);
        Ok(())
    }

    #[test]
    fn accounts_are_managed_by_owner_or_admin() {
        let mut member = User::from_input(input("ivy", "pw", "ivy@example.org")).unwrap();
        member.id = 2;
        let mut other = User::from_input(input("jack", "pw", "jack@example.org")).unwrap();
        other.id = 3;
        let mut admin = User::from_input(input("root", "pw", "root@example.org")).unwrap();
        admin.id = 1;
        admin.user_role = String::from(ADMIN_ROLE);

        let profile = UserInput {
            forename: Some(String::from("Ivy")),
            ..UserInput::default()
        };
        let promotion = UserInput {
            user_role: Some(String::from(ADMIN_ROLE)),
            ..UserInput::default()
        };

        assert!(User::authorize(&member, Write::Update(&member, &profile)).is_ok());
        assert!(User::authorize(&member, Write::Delete(&member)).is_ok());
        assert!(matches!(
            User::authorize(&member, Write::Update(&member, &promotion)),
            Err(ModelError::Forbidden(_))
        ));
        assert!(matches!(
            User::authorize(&member, Write::Update(&other, &profile)),
            Err(ModelError::Forbidden(_))
        ));
        assert!(User::authorize(&member, Write::Delete(&other)).is_err());
        assert!(User::authorize(&member, Write::Create(&profile)).is_err());

        assert!(User::authorize(&admin, Write::Update(&other, &promotion)).is_ok());
        assert!(User::authorize(&admin, Write::Create(&profile)).is_ok());
    }
}

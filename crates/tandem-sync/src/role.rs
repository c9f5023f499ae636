use tandem_types::models::{Role, Screen};

/// Classify an identity. Exactly one email is the admin, compared verbatim;
/// every other signed-in identity is a plain user.
pub fn classify(email: Option<&str>, admin_email: &str) -> Role {
    match email {
        None => Role::Anonymous,
        Some(email) if !admin_email.is_empty() && email == admin_email => Role::Admin,
        Some(_) => Role::User,
    }
}

/// Where a role ends up when asking for `requested` (or for the landing
/// screen when `None`).
///
/// Anonymous identities may only reach the public screens and land on login.
/// Users always land in their single conversation. Admins may reach the
/// directory and the admin room and land on the directory otherwise.
pub fn route(role: Role, requested: Option<Screen>) -> Screen {
    match (role, requested) {
        (Role::Anonymous, Some(screen)) if screen.is_public() => screen,
        (Role::Anonymous, _) => Screen::Login,

        (Role::User, _) => Screen::ChatRoom,

        (Role::Admin, Some(screen @ (Screen::ChatList | Screen::AdminChatRoom))) => screen,
        (Role::Admin, _) => Screen::ChatList,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADMIN: &str = "admin@example.com";

    #[test]
    fn admin_is_exact_email_match() {
        assert_eq!(classify(Some(ADMIN), ADMIN), Role::Admin);
        assert_eq!(classify(Some("Admin@example.com"), ADMIN), Role::User);
        assert_eq!(classify(Some("someone@example.com"), ADMIN), Role::User);
        assert_eq!(classify(None, ADMIN), Role::Anonymous);
    }

    #[test]
    fn unset_admin_email_makes_nobody_admin() {
        assert_eq!(classify(Some(""), ""), Role::User);
    }

    #[test]
    fn landing_screens() {
        assert_eq!(route(Role::Anonymous, None), Screen::Login);
        assert_eq!(route(Role::User, None), Screen::ChatRoom);
        assert_eq!(route(Role::Admin, None), Screen::ChatList);
    }

    #[test]
    fn anonymous_only_reaches_public_screens() {
        assert_eq!(route(Role::Anonymous, Some(Screen::CreateAccount)), Screen::CreateAccount);
        assert_eq!(route(Role::Anonymous, Some(Screen::ForgotPassword)), Screen::ForgotPassword);
        assert_eq!(route(Role::Anonymous, Some(Screen::ChatRoom)), Screen::Login);
        assert_eq!(route(Role::Anonymous, Some(Screen::ChatList)), Screen::Login);
    }

    #[test]
    fn users_are_kept_out_of_admin_screens() {
        assert_eq!(route(Role::User, Some(Screen::ChatList)), Screen::ChatRoom);
        assert_eq!(route(Role::User, Some(Screen::AdminChatRoom)), Screen::ChatRoom);
        assert_eq!(route(Role::User, Some(Screen::Login)), Screen::ChatRoom);
    }

    #[test]
    fn admins_are_kept_out_of_the_user_room() {
        assert_eq!(route(Role::Admin, Some(Screen::AdminChatRoom)), Screen::AdminChatRoom);
        assert_eq!(route(Role::Admin, Some(Screen::ChatRoom)), Screen::ChatList);
        assert_eq!(route(Role::Admin, Some(Screen::Login)), Screen::ChatList);
    }
}

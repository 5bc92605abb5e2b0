// HELLO / AUTH_RESULT decisions.
//
// Both sides send HELLO as soon as a link opens. Only the host judges: it
// ignores a HELLO from anything but a guest and checks the guest's password
// against its own, comparing trimmed strings. A host without a password
// accepts everyone.

use minechess_protocol::{AuthResultPayload, HelloPayload, Role};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HelloVerdict {
    /// Not a guest, or we are not the host. No reply.
    Ignore,
    Accept,
    Reject(String),
}

pub fn judge_hello(local_role: Role, required_password: Option<&str>, hello: &HelloPayload) -> HelloVerdict {
    if local_role != Role::Host || hello.role != Role::Guest {
        return HelloVerdict::Ignore;
    }
    let required = required_password.map(str::trim).filter(|p| !p.is_empty());
    let Some(required) = required else {
        return HelloVerdict::Accept;
    };
    let offered = hello.password.as_deref().map(str::trim).unwrap_or_default();
    if offered == required {
        HelloVerdict::Accept
    } else {
        HelloVerdict::Reject("invalid_password".into())
    }
}

pub fn auth_result(verdict: &HelloVerdict, room_name: Option<&str>) -> Option<AuthResultPayload> {
    match verdict {
        HelloVerdict::Ignore => None,
        HelloVerdict::Accept => Some(AuthResultPayload {
            accepted: true,
            reason: None,
            room_name: room_name.map(str::to_owned),
        }),
        HelloVerdict::Reject(reason) => Some(AuthResultPayload {
            accepted: false,
            reason: Some(reason.clone()),
            room_name: None,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guest(password: Option<&str>) -> HelloPayload {
        HelloPayload {
            role: Role::Guest,
            peer_id: "g".into(),
            password: password.map(str::to_owned),
        }
    }

    #[test]
    fn password_compared_trimmed() {
        assert_eq!(judge_hello(Role::Host, Some(" pw "), &guest(Some("pw  "))), HelloVerdict::Accept);
        assert_eq!(
            judge_hello(Role::Host, Some("pw"), &guest(Some("nope"))),
            HelloVerdict::Reject("invalid_password".into())
        );
        assert_eq!(
            judge_hello(Role::Host, Some("pw"), &guest(None)),
            HelloVerdict::Reject("invalid_password".into())
        );
    }

    #[test]
    fn open_room_and_non_guest() {
        assert_eq!(judge_hello(Role::Host, None, &guest(Some("x"))), HelloVerdict::Accept);
        let mut host_hello = guest(None);
        host_hello.role = Role::Host;
        assert_eq!(judge_hello(Role::Host, None, &host_hello), HelloVerdict::Ignore);
        assert_eq!(judge_hello(Role::Guest, None, &guest(None)), HelloVerdict::Ignore);
    }

    #[test]
    fn results_carry_room_name_only_on_accept() {
        let ok = auth_result(&HelloVerdict::Accept, Some("Den")).unwrap();
        assert!(ok.accepted);
        assert_eq!(ok.room_name.as_deref(), Some("Den"));
        let no = auth_result(&HelloVerdict::Reject("full".into()), Some("Den")).unwrap();
        assert!(!no.accepted);
        assert_eq!(no.reason.as_deref(), Some("full"));
        assert!(auth_result(&HelloVerdict::Ignore, None).is_none());
    }
}

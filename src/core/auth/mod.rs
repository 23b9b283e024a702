// ─── Login File ───
// Reads the account name out of a Steam-style `loginusers.vdf`. The
// account only picks which local prefix to use; nothing else here is
// interpreted.

use std::path::Path;

use tracing::{debug, warn};

use crate::core::error::{LauncherError, LauncherResult};
use crate::core::steam::quoted_tokens;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginUser {
    pub account_name: String,
    pub most_recent: bool,
}

/// Account to use from `path`: the most recent login, else the first one.
pub fn read_account(path: &Path) -> LauncherResult<Option<String>> {
    let text = std::fs::read_to_string(path).map_err(|source| LauncherError::io(path, source))?;
    let users = parse_login_users(&text);
    debug!("Found {} login entries in {:?}", users.len(), path);

    let account = select_account(&users);
    match &account {
        Some(name) if !is_usable_account(name) => {
            warn!("Ignoring account {:?} from {:?}: not usable as a directory name", name, path);
            Ok(None)
        }
        _ => Ok(account),
    }
}

pub fn select_account(users: &[LoginUser]) -> Option<String> {
    users
        .iter()
        .find(|u| u.most_recent)
        .or_else(|| users.first())
        .map(|u| u.account_name.clone())
}

fn is_usable_account(name: &str) -> bool {
    !name.is_empty() && !name.contains(['/', '\\']) && !name.starts_with('.')
}

/// Collects `AccountName`/`MostRecent` pairs from each user block.
pub fn parse_login_users(text: &str) -> Vec<LoginUser> {
    let mut users = Vec::new();
    let mut depth = 0usize;
    let mut account_name: Option<String> = None;
    let mut most_recent = false;

    for line in text.lines() {
        let line = line.trim();
        match line {
            "{" => depth += 1,
            "}" => {
                // Closing a user block (depth 2 inside the "users" root).
                if depth == 2 {
                    if let Some(name) = account_name.take() {
                        users.push(LoginUser {
                            account_name: name,
                            most_recent,
                        });
                    }
                    most_recent = false;
                }
                depth = depth.saturating_sub(1);
            }
            _ if depth == 2 => {
                let tokens = quoted_tokens(line);
                if let [key, value] = tokens.as_slice() {
                    if key.eq_ignore_ascii_case("AccountName") {
                        account_name = Some(value.to_string());
                    } else if key.eq_ignore_ascii_case("MostRecent") {
                        most_recent = *value == "1";
                    }
                }
            }
            _ => {}
        }
    }
    users
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOGIN_USERS: &str = r#"
"users"
{
	"76561190000000001"
	{
		"AccountName"		"first_driver"
		"PersonaName"		"First"
		"MostRecent"		"0"
	}
	"76561190000000002"
	{
		"AccountName"		"second_driver"
		"MostRecent"		"1"
	}
}
"#;

    #[test]
    fn most_recent_login_wins() {
        let users = parse_login_users(LOGIN_USERS);
        assert_eq!(users.len(), 2);
        assert_eq!(select_account(&users).as_deref(), Some("second_driver"));
    }

    #[test]
    fn first_login_when_none_is_recent() {
        let text = LOGIN_USERS.replace("\"MostRecent\"\t\t\"1\"", "\"MostRecent\"\t\t\"0\"");
        let users = parse_login_users(&text);
        assert_eq!(select_account(&users).as_deref(), Some("first_driver"));
    }

    #[test]
    fn reads_from_disk_and_rejects_unsafe_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loginusers.vdf");

        std::fs::write(&path, LOGIN_USERS).unwrap();
        assert_eq!(read_account(&path).unwrap().as_deref(), Some("second_driver"));

        std::fs::write(&path, LOGIN_USERS.replace("second_driver", "../escape")).unwrap();
        assert_eq!(read_account(&path).unwrap(), None);

        assert!(read_account(&dir.path().join("missing.vdf")).is_err());
    }
}

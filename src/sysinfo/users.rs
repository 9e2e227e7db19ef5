//! Host account enumeration.

use serde_json::{json, Value};
use sysinfo::{Groups, Users};

/// All host users: name, uid, primary gid, and member group names.
pub fn users_json() -> Value {
    let users = Users::new_with_refreshed_list();
    Value::Array(
        users
            .list()
            .iter()
            .map(|user| {
                let groups: Vec<String> =
                    user.groups().iter().map(|g| g.name().to_string()).collect();
                json!({
                    "name": user.name(),
                    "uid": **user.id(),
                    "gid": *user.group_id(),
                    "groups": groups,
                })
            })
            .collect(),
    )
}

/// All host groups: name and gid.
pub fn groups_json() -> Value {
    let groups = Groups::new_with_refreshed_list();
    Value::Array(
        groups
            .list()
            .iter()
            .map(|group| json!({ "name": group.name(), "gid": **group.id() }))
            .collect(),
    )
}

/// The account the server process runs as.
pub fn current_user_json() -> Value {
    let uid = unsafe { libc::getuid() };
    let gid = unsafe { libc::getgid() };
    let users = Users::new_with_refreshed_list();
    let name = users
        .list()
        .iter()
        .find(|user| **user.id() == uid)
        .map(|user| user.name().to_string());
    json!({ "name": name, "uid": uid, "gid": gid })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_user_matches_process_uid() {
        let value = current_user_json();
        assert_eq!(value["uid"].as_u64().unwrap(), u64::from(unsafe { libc::getuid() }));
    }

    #[test]
    fn user_and_group_lists_are_arrays() {
        assert!(users_json().is_array());
        let groups = groups_json();
        let groups = groups.as_array().unwrap();
        // Every host has at least a root group.
        assert!(!groups.is_empty());
        assert!(groups[0]["name"].is_string());
    }
}

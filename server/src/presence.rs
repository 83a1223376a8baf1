use std::{
    collections::HashMap,
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    time::Instant,
};

use serde::{Deserialize, Serialize};

/// Cursor selection; `start <= end` always holds for stored entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionRange {
    pub start: u64,
    pub end: u64,
}

impl SelectionRange {
    pub fn is_valid(&self) -> bool {
        self.start <= self.end
    }
}

/// Live per-connection presence inside a room. `last_heartbeat` drives
/// eviction and dedup; `last_seen_ms` is the wall-clock value broadcast
/// to clients.
#[derive(Debug, Clone)]
pub struct PresenceEntry {
    pub user_id: String,
    pub name: String,
    pub avatar_color: String,
    pub cursor_position: u64,
    pub selection: SelectionRange,
    pub is_typing: bool,
    pub last_heartbeat: Instant,
    pub last_seen_ms: i64,
}

impl PresenceEntry {
    pub fn new(
        user_id: impl Into<String>,
        name: impl Into<String>,
        avatar_color: impl Into<String>,
        cursor_position: Option<u64>,
        selection: Option<SelectionRange>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            name: name.into(),
            avatar_color: avatar_color.into(),
            cursor_position: cursor_position.unwrap_or(0),
            selection: selection
                .filter(SelectionRange::is_valid)
                .unwrap_or(SelectionRange { start: 0, end: 0 }),
            is_typing: false,
            last_heartbeat: Instant::now(),
            last_seen_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Refreshes the heartbeat. Called for every inbound frame from the
    /// owning connection, including transport-level pongs.
    pub fn touch(&mut self) {
        self.last_heartbeat = Instant::now();
        self.last_seen_ms = chrono::Utc::now().timestamp_millis();
    }

    /// Partial merge: fields absent from the update keep their previous
    /// value.
    pub fn merge(&mut self, update: &PresenceChange) {
        if let Some(name) = &update.name {
            self.name = name.clone();
        }
        if let Some(color) = &update.avatar_color {
            self.avatar_color = color.clone();
        }
        if let Some(position) = update.cursor_position {
            self.cursor_position = position;
        }
        if let Some(selection) = update.selection_range {
            if selection.is_valid() {
                self.selection = selection;
            }
        }
        if let Some(is_typing) = update.is_typing {
            self.is_typing = is_typing;
        }
    }
}

/// Fields a `cursor_update` frame may carry; all optional.
#[derive(Debug, Clone, Default)]
pub struct PresenceChange {
    pub name: Option<String>,
    pub avatar_color: Option<String>,
    pub cursor_position: Option<u64>,
    pub selection_range: Option<SelectionRange>,
    pub is_typing: Option<bool>,
}

/// Wire shape of one user inside a `presence_update` broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUser {
    pub user_id: String,
    pub name: String,
    pub avatar_color: String,
    pub cursor_position: u64,
    pub selection_range: SelectionRange,
    pub is_typing: bool,
    pub last_heartbeat: i64,
}

impl From<&PresenceEntry> for PresenceUser {
    fn from(entry: &PresenceEntry) -> Self {
        Self {
            user_id: entry.user_id.clone(),
            name: entry.name.clone(),
            avatar_color: entry.avatar_color.clone(),
            cursor_position: entry.cursor_position,
            selection_range: entry.selection,
            is_typing: entry.is_typing,
            last_heartbeat: entry.last_seen_ms,
        }
    }
}

/// Broadcast view: one entry per distinct user, keeping the freshest
/// heartbeat when the same user holds several connections. Computed at
/// broadcast time so a second tab leaving never erases the first tab's
/// presence. Output is sorted by user id for a stable wire order.
pub fn dedup_view<'a>(entries: impl Iterator<Item = &'a PresenceEntry>) -> Vec<PresenceUser> {
    let mut freshest: HashMap<&'a str, &'a PresenceEntry> = HashMap::new();
    for entry in entries {
        freshest
            .entry(entry.user_id.as_str())
            .and_modify(|current| {
                if entry.last_heartbeat > current.last_heartbeat {
                    *current = entry;
                }
            })
            .or_insert(entry);
    }

    let mut users: Vec<PresenceUser> = freshest.into_values().map(PresenceUser::from).collect();
    users.sort_by(|a, b| a.user_id.cmp(&b.user_id));
    users
}

const AVATAR_PALETTE: [&str; 8] = [
    "#d94f70", "#4f7bd9", "#3faa6d", "#d9a23f", "#8a5fd1", "#2fa8b8", "#c76b3a", "#5f6fd1",
];

/// Stable fallback color for users whose client did not send one.
pub fn default_avatar_color(user_id: &str) -> &'static str {
    let mut hasher = DefaultHasher::new();
    user_id.hash(&mut hasher);
    AVATAR_PALETTE[(hasher.finish() % AVATAR_PALETTE.len() as u64) as usize]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn entry(user_id: &str) -> PresenceEntry {
        PresenceEntry::new(user_id, user_id, "#fff", None, None)
    }

    #[test]
    fn merge_keeps_unspecified_fields() {
        let mut presence = PresenceEntry::new(
            "u1",
            "Alice",
            "#fff",
            Some(4),
            Some(SelectionRange { start: 1, end: 3 }),
        );

        presence.merge(&PresenceChange {
            cursor_position: Some(9),
            ..Default::default()
        });

        assert_eq!(presence.cursor_position, 9);
        assert_eq!(presence.name, "Alice");
        assert_eq!(presence.selection, SelectionRange { start: 1, end: 3 });
        assert!(!presence.is_typing);
    }

    #[test]
    fn merge_rejects_inverted_selection() {
        let mut presence = entry("u1");
        presence.merge(&PresenceChange {
            selection_range: Some(SelectionRange { start: 5, end: 2 }),
            ..Default::default()
        });
        assert_eq!(presence.selection, SelectionRange { start: 0, end: 0 });
    }

    #[test]
    fn dedup_keeps_one_entry_per_user() {
        let mut first_tab = entry("u1");
        first_tab.cursor_position = 1;
        let mut second_tab = entry("u1");
        second_tab.cursor_position = 2;
        second_tab.last_heartbeat = first_tab.last_heartbeat + Duration::from_millis(50);
        let other = entry("u2");

        let users = dedup_view([&first_tab, &second_tab, &other].into_iter());

        assert_eq!(users.len(), 2);
        let u1 = users.iter().find(|u| u.user_id == "u1").unwrap();
        assert_eq!(u1.cursor_position, 2, "freshest tab wins");
    }

    #[test]
    fn dedup_is_order_independent() {
        let mut stale = entry("u1");
        let mut fresh = entry("u1");
        fresh.cursor_position = 7;
        fresh.last_heartbeat = stale.last_heartbeat + Duration::from_millis(10);
        stale.cursor_position = 3;

        let forward = dedup_view([&stale, &fresh].into_iter());
        let reverse = dedup_view([&fresh, &stale].into_iter());
        assert_eq!(forward[0].cursor_position, 7);
        assert_eq!(reverse[0].cursor_position, 7);
    }

    #[test]
    fn fallback_color_is_stable() {
        assert_eq!(default_avatar_color("u1"), default_avatar_color("u1"));
        assert!(default_avatar_color("u1").starts_with('#'));
    }
}

//! The tray menu as plain data, rebuilt whenever the profile set changes.

use serde::{Deserialize, Serialize};

/// What selecting a menu entry does.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum MenuAction {
    ShowRecent,
    ToggleAlerts,
    ReloadProfiles,
    StartProfile { name: String },
    StopBackup,
    Exit,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct MenuEntry {
    pub label: String,
    pub action: MenuAction,
    /// Check mark state for toggle entries.
    pub checked: Option<bool>,
}

impl MenuEntry {
    fn new(label: impl Into<String>, action: MenuAction) -> Self {
        Self {
            label: label.into(),
            action,
            checked: None,
        }
    }
}

/// Builds the menu for the given profile names.
pub fn tray_menu<'a>(
    profile_names: impl IntoIterator<Item = &'a str>,
    alerts_on: bool,
) -> Vec<MenuEntry> {
    let mut entries = vec![
        MenuEntry::new("Show Recent", MenuAction::ShowRecent),
        MenuEntry {
            checked: Some(alerts_on),
            ..MenuEntry::new("Show Alerts", MenuAction::ToggleAlerts)
        },
        MenuEntry::new("Reload Profiles", MenuAction::ReloadProfiles),
    ];
    entries.extend(profile_names.into_iter().map(|name| {
        MenuEntry::new(
            format!("Start {}", name),
            MenuAction::StartProfile {
                name: name.to_string(),
            },
        )
    }));
    entries.push(MenuEntry::new("Stop Backup", MenuAction::StopBackup));
    entries.push(MenuEntry::new("Exit", MenuAction::Exit));
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_menu_without_profiles() {
        let menu = tray_menu(std::iter::empty(), true);
        let labels: Vec<&str> = menu.iter().map(|e| e.label.as_str()).collect();
        assert_eq!(
            labels,
            vec!["Show Recent", "Show Alerts", "Reload Profiles", "Stop Backup", "Exit"]
        );
        assert_eq!(menu[1].checked, Some(true));
    }

    #[test]
    fn test_profile_entries() {
        let menu = tray_menu(["docs", "photos"], false);
        assert_eq!(menu.len(), 7);
        assert_eq!(menu[1].checked, Some(false));
        assert_eq!(menu[3].label, "Start docs");
        assert_eq!(
            menu[4].action,
            MenuAction::StartProfile {
                name: "photos".to_string()
            }
        );
        assert_eq!(menu.last().unwrap().action, MenuAction::Exit);
    }
}

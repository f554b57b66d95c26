use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::upstream::MenuResponse;

/// Process-wide cache of the most recently fetched menu per phone number.
/// Entries never expire on their own; the conversation layer invalidates
/// them explicitly via [`MenuCache::clear`]. Only the on-demand `/menu`
/// path reads this cache, the scheduled fan-out always fetches fresh.
#[derive(Default)]
pub struct MenuCache {
    menus: Mutex<HashMap<String, Arc<MenuResponse>>>,
}

impl MenuCache {
    pub fn get(&self, phone: &str) -> Option<Arc<MenuResponse>> {
        self.lock().get(phone).cloned()
    }

    pub fn put(&self, phone: &str, menu: Arc<MenuResponse>) {
        self.lock().insert(phone.to_owned(), menu);
    }

    pub fn clear(&self, phone: &str) {
        self.lock().remove(phone);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<MenuResponse>>> {
        // The map is only touched in short synchronous sections, so a
        // poisoned lock can only mean a panic mid-insert; recover the map.
        self.menus.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn menu(id: &str) -> Arc<MenuResponse> {
        Arc::new(MenuResponse {
            id: id.to_owned(),
            ..Default::default()
        })
    }

    #[test]
    fn put_then_get_returns_the_same_menu() {
        let cache = MenuCache::default();
        cache.put("123456789", menu("a"));

        assert_eq!(cache.get("123456789").unwrap().id, "a");
        assert!(cache.get("987654321").is_none());
    }

    #[test]
    fn put_replaces_and_clear_removes() {
        let cache = MenuCache::default();
        cache.put("123456789", menu("a"));
        cache.put("123456789", menu("b"));
        assert_eq!(cache.get("123456789").unwrap().id, "b");

        cache.clear("123456789");
        assert!(cache.get("123456789").is_none());

        // clearing an absent entry is a no-op
        cache.clear("123456789");
    }
}

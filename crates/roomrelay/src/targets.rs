//! Target Registry (C5): mirrors the browser's "attached" targets from
//! lifecycle events so a freshly-attaching agent can be shown the
//! current target graph without the browser peer replaying history.

use std::collections::HashMap;

use serde_json::Value;

/// `{ sessionId, targetId, info }` (spec §3). `info` carries the raw
/// CDP-shaped `targetInfo` object as last reported by the browser peer.
#[derive(Debug, Clone)]
pub struct Target {
    pub session_id: String,
    pub target_id: String,
    pub info: Value,
}

impl Target {
    /// `info` with `attached` forced to the given value and `targetId`
    /// kept in sync — the shape agents expect in synthesized events.
    pub fn info_with_attached(&self, attached: bool) -> Value {
        let mut info = self.info.clone();
        if let Value::Object(ref mut map) = info {
            map.insert("attached".to_string(), Value::Bool(attached));
            map.insert(
                "targetId".to_string(),
                Value::String(self.target_id.clone()),
            );
        }
        info
    }
}

/// Mirrors `attached` minus `detached` events keyed by sessionId, with
/// the most recent info update applied (spec §8 invariant).
#[derive(Debug, Default)]
pub struct TargetRegistry {
    by_session: HashMap<String, Target>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, session_id: String, target_id: String, info: Value) {
        self.by_session.insert(
            session_id.clone(),
            Target {
                session_id,
                target_id,
                info,
            },
        );
    }

    pub fn detach(&mut self, session_id: &str) -> Option<Target> {
        self.by_session.remove(session_id)
    }

    /// `Target.targetInfoChanged`: replace info for the target whose
    /// `targetId` matches, regardless of session.
    pub fn update_info_by_target_id(&mut self, target_id: &str, info: Value) -> bool {
        if let Some(t) = self
            .by_session
            .values_mut()
            .find(|t| t.target_id == target_id)
        {
            t.info = info;
            true
        } else {
            false
        }
    }

    /// Top-frame `Page.frameNavigated`: update url, and title from the
    /// frame name only if it's non-empty (else leave existing title).
    pub fn update_navigation(&mut self, session_id: &str, url: &str, frame_name: Option<&str>) -> bool {
        let Some(t) = self.by_session.get_mut(session_id) else {
            return false;
        };
        if let Value::Object(ref mut map) = t.info {
            map.insert("url".to_string(), Value::String(url.to_string()));
            if let Some(name) = frame_name {
                if !name.is_empty() {
                    map.insert("title".to_string(), Value::String(name.to_string()));
                }
            }
        }
        true
    }

    pub fn get_by_session(&self, session_id: &str) -> Option<&Target> {
        self.by_session.get(session_id)
    }

    pub fn get_by_target_id(&self, target_id: &str) -> Option<&Target> {
        self.by_session.values().find(|t| t.target_id == target_id)
    }

    pub fn all(&self) -> impl Iterator<Item = &Target> {
        self.by_session.values()
    }

    /// Legacy fallback used by `Target.getTargetInfo` when neither a
    /// targetId nor a sessionId resolves (spec §4.3, §9 open question).
    pub fn first(&self) -> Option<&Target> {
        self.by_session.values().next()
    }

    pub fn clear(&mut self) {
        self.by_session.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.by_session.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn info(target_id: &str, url: &str) -> Value {
        json!({ "targetId": target_id, "type": "page", "title": "", "url": url })
    }

    #[test]
    fn mirrors_attach_then_detach() {
        let mut reg = TargetRegistry::new();
        reg.attach("s1".into(), "t1".into(), info("t1", "/a"));
        assert!(reg.get_by_session("s1").is_some());
        reg.detach("s1");
        assert!(reg.get_by_session("s1").is_none());
    }

    #[test]
    fn navigation_updates_url_and_falls_back_title() {
        let mut reg = TargetRegistry::new();
        reg.attach("s1".into(), "t1".into(), info("t1", "/a"));
        reg.update_navigation("s1", "/a2", None);
        let t = reg.get_by_session("s1").unwrap();
        assert_eq!(t.info["url"], "/a2");

        reg.update_navigation("s1", "/a3", Some("New Title"));
        let t = reg.get_by_session("s1").unwrap();
        assert_eq!(t.info["title"], "New Title");

        // Empty frame name leaves the existing title untouched.
        reg.update_navigation("s1", "/a4", Some(""));
        let t = reg.get_by_session("s1").unwrap();
        assert_eq!(t.info["title"], "New Title");
    }

    #[test]
    fn info_changed_finds_by_target_id_across_sessions() {
        let mut reg = TargetRegistry::new();
        reg.attach("s1".into(), "t1".into(), info("t1", "/a"));
        assert!(reg.update_info_by_target_id("t1", json!({"targetId": "t1", "title": "new"})));
        assert_eq!(reg.get_by_session("s1").unwrap().info["title"], "new");
        assert!(!reg.update_info_by_target_id("missing", json!({})));
    }

    #[test]
    fn get_targets_marks_attached_true() {
        let mut reg = TargetRegistry::new();
        reg.attach("s1".into(), "t1".into(), info("t1", "/a"));
        let t = reg.get_by_session("s1").unwrap();
        assert_eq!(t.info_with_attached(true)["attached"], true);
    }
}

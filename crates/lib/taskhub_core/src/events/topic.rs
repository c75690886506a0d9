//! Event type → topic routing by namespace prefix.

/// Topic for `user.*` events.
pub const USER_TOPIC: &str = "user-events";
/// Topic for `project.*` events.
pub const PROJECT_TOPIC: &str = "project-events";
/// Topic for `task.*` events.
pub const TASK_TOPIC: &str = "task-events";
/// Catch-all topic for anything unmatched.
pub const GENERAL_TOPIC: &str = "general-events";

/// Pure mapping from event type to topic. Stateless apart from its table.
///
/// The longest matching prefix wins, so `"task.comment."` can be routed
/// apart from `"task."` by adding a route without touching the publisher.
#[derive(Debug, Clone)]
pub struct TopicRouter {
    routes: Vec<(String, String)>,
    fallback: String,
}

impl Default for TopicRouter {
    fn default() -> Self {
        Self::empty(GENERAL_TOPIC)
            .with_route("user.", USER_TOPIC)
            .with_route("project.", PROJECT_TOPIC)
            .with_route("task.", TASK_TOPIC)
    }
}

impl TopicRouter {
    /// A router with no prefixes; everything goes to `fallback`.
    pub fn empty(fallback: impl Into<String>) -> Self {
        Self {
            routes: Vec::new(),
            fallback: fallback.into(),
        }
    }

    /// Add (or replace) a prefix route.
    pub fn with_route(mut self, prefix: impl Into<String>, topic: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let topic = topic.into();
        match self.routes.iter_mut().find(|(p, _)| *p == prefix) {
            Some(existing) => existing.1 = topic,
            None => self.routes.push((prefix, topic)),
        }
        self
    }

    pub fn topic_for(&self, event_type: &str) -> &str {
        self.routes
            .iter()
            .filter(|(prefix, _)| event_type.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, topic)| topic.as_str())
            .unwrap_or(&self.fallback)
    }

    /// Every topic this router can produce, fallback included, deduplicated.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.routes.iter().map(|(_, t)| t.clone()).collect();
        topics.push(self.fallback.clone());
        topics.sort();
        topics.dedup();
        topics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_routes() {
        let router = TopicRouter::default();
        assert_eq!(router.topic_for("user.created"), USER_TOPIC);
        assert_eq!(router.topic_for("project.deleted"), PROJECT_TOPIC);
        assert_eq!(router.topic_for("task.updated"), TASK_TOPIC);
        assert_eq!(router.topic_for("unknown.type"), GENERAL_TOPIC);
        assert_eq!(router.topic_for("users.created"), GENERAL_TOPIC);
    }

    #[test]
    fn longest_prefix_wins() {
        let router = TopicRouter::default().with_route("task.comment.", "comment-events");
        assert_eq!(router.topic_for("task.comment.added"), "comment-events");
        assert_eq!(router.topic_for("task.created"), TASK_TOPIC);
    }

    #[test]
    fn topics_include_fallback() {
        let topics = TopicRouter::default().topics();
        assert_eq!(topics.len(), 4);
        assert!(topics.contains(&GENERAL_TOPIC.to_string()));
    }
}

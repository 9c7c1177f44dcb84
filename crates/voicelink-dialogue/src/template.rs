//! Chat template
//!
//! Builds the LLM input for one run: the system prompt with its variable
//! slots filled, the recent history window, then the user message.

use chrono::{DateTime, Local};
use voicelink_core::{LocationInfo, Message};

/// Variables available to the system prompt.
#[derive(Debug, Clone)]
pub struct TemplateVars {
    pub now: DateTime<Local>,
    pub location: LocationInfo,
}

impl TemplateVars {
    pub fn new(location: LocationInfo) -> Self {
        Self {
            now: Local::now(),
            location,
        }
    }
}

pub struct ChatTemplate {
    system_prompt: String,
}

impl ChatTemplate {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
        }
    }

    /// Render the full message list: `[system, history.., user]`.
    pub fn render(
        &self,
        history: Vec<Message>,
        user: Message,
        vars: &TemplateVars,
    ) -> Vec<Message> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(self.fill(vars)));
        messages.extend(history);
        messages.push(user);
        messages
    }

    fn fill(&self, vars: &TemplateVars) -> String {
        let city = if vars.location.has_city() {
            vars.location.city.as_str()
        } else {
            "未知"
        };
        self.system_prompt
            .replace("{date}", &vars.now.format("%Y-%m-%d").to_string())
            .replace("{time}", &vars.now.format("%H:%M").to_string())
            .replace("{city}", city)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voicelink_core::Role;

    #[test]
    fn test_render_order() {
        let template = ChatTemplate::new("你是助手。");
        let history = vec![Message::user("早"), Message::assistant("早上好！")];
        let messages = template.render(
            history,
            Message::user("今天天气？"),
            &TemplateVars::new(LocationInfo::default()),
        );

        let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::User]
        );
        assert_eq!(messages.last().unwrap().content, "今天天气？");
    }

    #[test]
    fn test_variable_substitution() {
        let template = ChatTemplate::new("现在是{date} {time}，用户在{city}。");
        let vars = TemplateVars::new(LocationInfo {
            city: "北京".into(),
            ..LocationInfo::default()
        });
        let messages = template.render(Vec::new(), Message::user("hi"), &vars);

        let system = &messages[0].content;
        assert!(system.contains("北京"));
        assert!(!system.contains("{date}"));
        assert!(!system.contains("{time}"));
    }

    #[test]
    fn test_missing_city_renders_placeholder() {
        let template = ChatTemplate::new("用户在{city}。");
        let vars = TemplateVars::new(LocationInfo::default());
        let messages = template.render(Vec::new(), Message::user("hi"), &vars);
        assert_eq!(messages[0].content, "用户在未知。");
    }
}

//! Server-rendered chat page.
//!
//! Templates are compiled once into a `minijinja` environment. Template names
//! end in `.html`, which turns on HTML auto-escaping for every interpolated
//! value, so turn content is always rendered as text.

use minijinja::{Environment, context};

use crate::config::UiConfig;
use crate::session::Turn;

const LAYOUT: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>{{ ui.title }}</title>
    <style>
        body { font-family: system-ui, sans-serif; max-width: 44rem; margin: 0 auto; padding: 1rem; color: #1f2328; }
        details { margin: 1rem 0; padding: .75rem 1rem; border: 1px solid #d0d7de; border-radius: .5rem; }
        .warning { color: #9a3412; font-weight: 600; }
        .turns { overflow-y: auto; height: 400px; border: 1px solid #d0d7de; border-radius: .5rem; padding: .5rem; }
        .turn { margin: .5rem 0; padding: .5rem .75rem; border-radius: .5rem; white-space: pre-wrap; }
        .turn.user { background: #ddf4ff; }
        .turn.assistant { background: #f6f8fa; }
        .role { display: block; font-size: .75rem; color: #57606a; text-transform: capitalize; }
        form { display: flex; gap: .5rem; margin-top: 1rem; }
        form input[type=text] { flex: 1; padding: .6rem; }
        footer { margin-top: 1.5rem; border-top: 1px solid #d0d7de; font-style: italic; font-size: .85rem; }
    </style>
</head>
<body>
{% block body %}{% endblock %}
</body>
</html>"#;

const CHAT: &str = r#"{% extends "layout.html" %}
{% block body %}
    <h1>{{ ui.title }}</h1>
    <details>
        <summary>{{ ui.info_heading }}</summary>
        {% if ui.warning %}<p class="warning">{{ ui.warning }}</p>{% endif %}
        {% for line in ui.info_panel %}<p>{{ line }}</p>{% endfor %}
    </details>
    <div class="turns" id="turns">
        {% for turn in turns %}
        <div class="turn {{ turn.role }}"><span class="role">{{ turn.role }}</span>{{ turn.content }}</div>
        {% endfor %}
    </div>
    <form method="post" action="/chat">
        <input type="hidden" name="session_id" value="{{ session_id }}">
        <input type="text" name="message" placeholder="{{ ui.input_placeholder }}" autocomplete="off" autofocus required>
        <button type="submit">Send</button>
    </form>
    <footer><p>{{ ui.footer }}</p></footer>
    <script>
        const turns = document.getElementById("turns");
        turns.scrollTop = turns.scrollHeight;
        document.querySelector("form").addEventListener("submit", (e) => {
            e.target.querySelector("button").disabled = true;
            e.target.querySelector("button").textContent = "Getting response...";
        });
    </script>
{% endblock %}"#;

/// Renders HTML pages from the static UI content and session turns.
#[derive(Debug)]
pub struct PageRenderer {
    env: Environment<'static>,
    ui: UiConfig,
}

impl PageRenderer {
    pub fn new(ui: UiConfig) -> Result<Self, minijinja::Error> {
        let mut env = Environment::new();
        env.add_template("layout.html", LAYOUT)?;
        env.add_template("chat.html", CHAT)?;
        Ok(Self { env, ui })
    }

    /// Render the chat page for one session.
    pub fn chat_page(&self, session_id: &str, turns: &[Turn]) -> Result<String, minijinja::Error> {
        self.env.get_template("chat.html")?.render(context! {
            ui => self.ui,
            session_id => session_id,
            turns => turns,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn renderer() -> PageRenderer {
        PageRenderer::new(UiConfig {
            info_panel: vec!["Call: (555) 010-0000".to_string()],
            ..UiConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_renders_turns_in_order() {
        let html = renderer()
            .chat_page(
                "abc",
                &[Turn::user("first question"), Turn::assistant("first answer")],
            )
            .unwrap();

        let q = html.find("first question").unwrap();
        let a = html.find("first answer").unwrap();
        assert!(q < a);
        assert!(html.contains(r#"value="abc""#));
        assert!(html.contains("Call: (555) 010-0000"));
        assert!(html.contains("For Emergencies Call 911"));
    }

    #[test]
    fn test_turn_content_is_escaped() {
        let html = renderer()
            .chat_page("abc", &[Turn::user("<script>alert(1)</script>")])
            .unwrap();
        assert!(!html.contains("<script>alert(1)</script>"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn test_empty_session_renders() {
        let html = renderer().chat_page("new", &[]).unwrap();
        assert!(html.contains("Post-Op Care Assistant"));
        assert!(!html.contains(r#"<div class="turn "#));
    }
}

//! Message body rendering for result notifications.

/// Named fields available to the message template.
#[derive(Debug, Clone)]
pub struct MessagePayload {
    pub username: String,
    pub task_id: i64,
    pub task_name: String,
    /// Local start time, `%Y-%m-%d %H:%M:%S`.
    pub start_time: String,
    /// Elapsed seconds (fractional).
    pub process_time: f64,
    pub status: String,
    pub output: String,
}

/// Turns a payload into a message body.
pub trait MessageRenderer: Send + Sync {
    fn render(&self, payload: &MessagePayload) -> Vec<u8>;
}

/// The fixed HTML notification template.
#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlTemplate;

impl MessageRenderer for HtmlTemplate {
    fn render(&self, payload: &MessagePayload) -> Vec<u8> {
        let body = format!(
            r#"Hello {username},<br/>

<p>Here is the result of the task run:</p>

<p>
Task ID: {task_id}<br/>
Task name: {task_name}<br/>
Started: {start_time}<br/>
Elapsed: {process_time} seconds<br/>
Status: {status}
</p>
<p>------------- task output -------------</p>
<p>{output}</p>
<p>
--------------------------------------------<br/>
This message was sent automatically, please do not reply.<br/>
To stop these notifications, change the task's notification setting.<br/>
</p>
"#,
            username = escape_html(&payload.username),
            task_id = payload.task_id,
            task_name = escape_html(&payload.task_name),
            start_time = escape_html(&payload.start_time),
            process_time = payload.process_time,
            status = escape_html(&payload.status),
            output = escape_html(&payload.output),
        );
        body.into_bytes()
    }
}

/// Escape text for inclusion in HTML.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

use crate::app::AppState;
use crate::config::PROJECT_NAME;
use axum::extract::State;
use axum::response::Html;

const CONSOLE_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<title>{{PROJECT}} console</title>
<style>
  body { font-family: sans-serif; background: #121212; color: #e0e0e0; margin: 0; display: flex; height: 100vh; }
  aside { width: 340px; padding: 20px; background: #1e1e1e; box-sizing: border-box; }
  main { flex: 1; padding: 20px; display: flex; flex-direction: column; }
  input, select, textarea, button { width: 100%; box-sizing: border-box; margin-bottom: 10px; padding: 8px; }
  #out { flex: 1; background: #000; padding: 16px; white-space: pre-wrap; overflow-y: auto; border-radius: 6px; }
</style>
</head>
<body>
<aside>
  <h2>{{PROJECT}}</h2>
  <label>API key</label>
  <input id="key" type="password" placeholder="Bearer key, if one is configured">
  <label>Model</label>
  <select id="model">{{MODEL_OPTIONS}}</select>
  <label>Prompt</label>
  <textarea id="prompt" rows="5"></textarea>
  <button id="send">Send</button>
</aside>
<main><div id="out"></div></main>
<script>
document.getElementById('send').onclick = async () => {
  const out = document.getElementById('out');
  const key = document.getElementById('key').value.trim();
  out.textContent = '';
  const headers = { 'Content-Type': 'application/json' };
  if (key) headers['Authorization'] = 'Bearer ' + key;
  const res = await fetch('/v1/chat/completions', {
    method: 'POST',
    headers,
    body: JSON.stringify({
      model: document.getElementById('model').value,
      messages: [{ role: 'user', content: document.getElementById('prompt').value }],
      stream: true
    })
  });
  if (!res.ok) { out.textContent = await res.text(); return; }
  const reader = res.body.getReader();
  const decoder = new TextDecoder();
  let buffer = '';
  for (;;) {
    const { done, value } = await reader.read();
    if (done) break;
    buffer += decoder.decode(value, { stream: true });
    const frames = buffer.split('\n\n');
    buffer = frames.pop();
    for (const frame of frames) {
      const data = frame.replace(/^data: /, '');
      if (data === '[DONE]') continue;
      try { out.textContent += JSON.parse(data).choices[0].delta.content || ''; } catch (e) {}
    }
  }
};
</script>
</body>
</html>
"#;

pub async fn console(State(state): State<AppState>) -> Html<String> {
    Html(render_console(&state.config.models))
}

fn render_console(models: &[String]) -> String {
    let options: String = models
        .iter()
        .map(|m| {
            let m = escape_html(m);
            format!("<option value=\"{m}\">{m}</option>")
        })
        .collect();
    CONSOLE_TEMPLATE
        .replace("{{PROJECT}}", PROJECT_NAME)
        .replace("{{MODEL_OPTIONS}}", &options)
}

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

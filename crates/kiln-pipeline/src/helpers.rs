//! Built-in template helpers available to every page, layout and partial.

use minijinja::value::{Rest, Value, ValueKind};
use minijinja::{Environment, HtmlEscape, State};

/// Register all helpers on `env`.
pub fn register(env: &mut Environment<'static>) {
    env.add_filter("markdown", markdown);
    env.add_function("ifpage", ifpage);
    env.add_function("unlesspage", unlesspage);
    env.add_function("if_eq", if_eq);
    env.add_function("lang", lang);
    env.add_function("incremented", incremented);
    env.add_function("log", log);
}

/// Render Markdown to HTML.
fn markdown(source: &str) -> Value {
    use pulldown_cmark::{html, Options, Parser};

    let options = Options::ENABLE_TABLES
        | Options::ENABLE_FOOTNOTES
        | Options::ENABLE_STRIKETHROUGH
        | Options::ENABLE_TASKLISTS;

    let parser = Parser::new_ext(source, options);

    let mut html_output = String::new();
    html::push_html(&mut html_output, parser);

    Value::from_safe_string(html_output)
}

fn current_page(state: &State) -> Option<String> {
    state
        .lookup("page")
        .and_then(|v| v.as_str().map(str::to_string))
}

/// True when the page being rendered is one of `names`.
fn ifpage(state: &State, names: Rest<String>) -> bool {
    current_page(state).is_some_and(|page| names.iter().any(|n| *n == page))
}

fn unlesspage(state: &State, names: Rest<String>) -> bool {
    !ifpage(state, names)
}

fn if_eq(a: Value, b: Value) -> bool {
    a == b
}

/// Bilingual text: `{en, hi}` objects render both spans, the Hindi one hidden.
fn lang(value: Value) -> Value {
    if value.kind() == ValueKind::Map {
        let en = value.get_attr("en").unwrap_or_default();
        let hi = value.get_attr("hi").unwrap_or_default();
        return Value::from_safe_string(format!(
            r#"<span class="en">{}</span><span class="hi d-none">{}</span>"#,
            HtmlEscape(&display(&en)),
            HtmlEscape(&display(&hi))
        ));
    }
    Value::from_safe_string(format!("<span>{}</span>", HtmlEscape(&display(&value))))
}

fn display(value: &Value) -> String {
    if value.is_undefined() || value.is_none() {
        String::new()
    } else {
        value.to_string()
    }
}

fn incremented(index: i64) -> i64 {
    index + 1
}

fn log(values: Rest<Value>) -> String {
    tracing::debug!("template log: {:?}", values.0);
    String::new()
}

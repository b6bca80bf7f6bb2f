use std::collections::HashSet;

use ammonia::Builder;

/// Clean user-authored text (posts, comments, bios) before it is stored.
///
/// No markup is allowed: tags are stripped and their text kept, while
/// `<script>`/`<style>` bodies are dropped entirely. Clients render this as
/// plain text; the sanitizing is a fail-safe against stored XSS.
pub fn clean_html(input: &str) -> String {
    let mut builder = Builder::empty();
    builder.clean_content_tags(HashSet::from(["script", "style"]));
    builder.clean(input).to_string()
}

//! Server-rendered HTML built from plain strings.
//!
//! Fragments return `String`; [`app`] wraps them into a full document. Every
//! value that did not come from this module goes through [`escape_html`].

use std::fmt::Write as _;

use axum::response::Html;

use crate::models::{Post, User};

pub const SITE_TITLE: &str = "Juniper";

/// Submits `form[data-json-form]` as JSON, echoing the CSRF token in a header.
const FORM_SCRIPT: &str = r#"<script>
document.querySelectorAll('form[data-json-form]').forEach(function (form) {
  form.addEventListener('submit', async function (event) {
    event.preventDefault();
    var data = Object.fromEntries(new FormData(form).entries());
    var status = form.querySelector('.form-status');
    var response = await fetch(form.getAttribute('action'), {
      method: form.dataset.method || 'POST',
      credentials: 'same-origin',
      headers: { 'Content-Type': 'application/json', 'X-CSRF-Token': data.csrf || '' },
      body: JSON.stringify(data)
    });
    if (response.ok) {
      if (form.dataset.redirect) {
        window.location.assign(form.dataset.redirect);
      } else if (status) {
        status.textContent = 'Saved.';
      }
      return;
    }
    var body = await response.json().catch(function () { return {}; });
    if (status) {
      status.textContent = body.error || body.message || response.statusText;
    }
  });
});
</script>"#;

pub fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

pub fn app(head_title: &str, header: &str, content: &str, footer: &str) -> Html<String> {
    Html(format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
         <title>{}</title>\n</head>\n<body>\n{header}\n<main>\n{content}\n</main>\n{footer}\n\
         {FORM_SCRIPT}\n</body>\n</html>\n",
        escape_html(head_title)
    ))
}

pub fn header(user: Option<&User>) -> String {
    let account = match user {
        Some(user) => format!(
            "<span class=\"user\">Signed in as {}</span> \
             <a href=\"/dashboard\">Dashboard</a> <a href=\"/logout\">Logout</a>",
            escape_html(user.display_name())
        ),
        None => String::from("<a href=\"/login\">Login</a> <a href=\"/register\">Register</a>"),
    };
    format!(
        "<header>\n<nav><a href=\"/\">{SITE_TITLE}</a> <a href=\"/about\">About</a> \
         <a href=\"/blog\">Blog</a> {account}</nav>\n</header>"
    )
}

pub fn footer() -> String {
    format!("<footer><p>{SITE_TITLE}, a small personal CMS.</p></footer>")
}

pub fn paragraph(text: &str) -> String {
    format!("<p>{}</p>", escape_html(text))
}

pub fn about() -> String {
    String::from(
        "<section>\n<h1>About</h1>\n\
         <p>Juniper is a personal site with a blog and a small dashboard for managing it.</p>\n\
         </section>",
    )
}

pub fn blog(posts: &[Post]) -> String {
    if posts.is_empty() {
        return String::from("<section>\n<h1>Blog</h1>\n<p>No posts yet.</p>\n</section>");
    }

    let mut items = String::new();
    for post in posts {
        let _ = writeln!(
            items,
            "<li><a href=\"/blog/{}\">{}</a> <time>{}</time></li>",
            escape_html(&post.slug),
            escape_html(&post.title),
            post.created_at.format("%Y-%m-%d")
        );
    }
    format!("<section>\n<h1>Blog</h1>\n<ul class=\"posts\">\n{items}</ul>\n</section>")
}

pub fn post(post: &Post) -> String {
    let body = post
        .content
        .split("\n\n")
        .filter(|block| !block.trim().is_empty())
        .map(paragraph)
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "<article>\n<h1>{}</h1>\n<time>{}</time>\n{body}\n</article>",
        escape_html(&post.title),
        post.created_at.format("%Y-%m-%d")
    )
}

fn csrf_input(csrf: &str) -> String {
    format!(
        "<input type=\"hidden\" name=\"csrf\" value=\"{}\">",
        escape_html(csrf)
    )
}

pub fn login(csrf: &str) -> String {
    format!(
        "<section>\n<h1>Login</h1>\n\
         <form action=\"/api/auth/login\" method=\"post\" data-json-form data-redirect=\"/dashboard\">\n\
         {}\n\
         <label>Username <input name=\"username\" autocomplete=\"username\" required></label>\n\
         <label>Password <input name=\"password\" type=\"password\" autocomplete=\"current-password\" required></label>\n\
         <button type=\"submit\">Login</button>\n<p class=\"form-status\"></p>\n</form>\n</section>",
        csrf_input(csrf)
    )
}

pub fn register(csrf: &str) -> String {
    format!(
        "<section>\n<h1>Register</h1>\n\
         <form action=\"/api/auth/register\" method=\"post\" data-json-form data-redirect=\"/dashboard\">\n\
         {}\n\
         <label>Username <input name=\"username\" autocomplete=\"username\" required></label>\n\
         <label>Password <input name=\"password\" type=\"password\" autocomplete=\"new-password\" required></label>\n\
         <label>Email <input name=\"email\" type=\"email\" required></label>\n\
         <label>Forename <input name=\"forename\"></label>\n\
         <label>Surname <input name=\"surname\"></label>\n\
         <label>Phone <input name=\"phone\" type=\"tel\"></label>\n\
         <label>Birthdate <input name=\"birthdate\" type=\"date\"></label>\n\
         <button type=\"submit\">Register</button>\n<p class=\"form-status\"></p>\n</form>\n</section>",
        csrf_input(csrf)
    )
}

pub fn verify(valid: bool) -> String {
    if valid {
        String::from("<section>\n<h1>Email verified</h1>\n<p>Thank you, your email address is confirmed.</p>\n</section>")
    } else {
        String::from("<section>\n<h1>Verification failed</h1>\n<p>The link is invalid or has already been used.</p>\n</section>")
    }
}

pub fn logged_out() -> String {
    String::from("<section>\n<h1>Logged out</h1>\n<p>You have been logged out.</p>\n</section>")
}

/// `models` pairs each registered model name with its row count.
pub fn dashboard(models: &[(&str, i64)], posts: &[Post], csrf: &str) -> String {
    let mut model_items = String::new();
    for (name, count) in models {
        let _ = writeln!(
            model_items,
            "<li>{} <span class=\"count\">{count}</span></li>",
            escape_html(name)
        );
    }

    let mut post_rows = String::new();
    for post in posts {
        let _ = writeln!(
            post_rows,
            "<tr><td>{}</td><td><a href=\"/blog/{}\">{}</a></td><td>{}</td></tr>",
            post.id,
            escape_html(&post.slug),
            escape_html(&post.title),
            post.updated_at.format("%Y-%m-%d %H:%M")
        );
    }

    format!(
        "<section>\n<h1>Dashboard</h1>\n<h2>Models</h2>\n<ul class=\"models\">\n{model_items}</ul>\n\
         <h2>Posts</h2>\n<table class=\"posts\">\n<tr><th>ID</th><th>Title</th><th>Updated</th></tr>\n\
         {post_rows}</table>\n\
         <h2>New post</h2>\n\
         <form action=\"/api/post\" method=\"post\" data-json-form data-redirect=\"/dashboard\">\n\
         {}\n\
         <label>Title <input name=\"title\" required></label>\n\
         <label>Slug <input name=\"slug\"></label>\n\
         <label>Content <textarea name=\"content\"></textarea></label>\n\
         <button type=\"submit\">Publish</button>\n<p class=\"form-status\"></p>\n</form>\n</section>",
        csrf_input(csrf)
    )
}

pub fn not_found() -> String {
    String::from("<section>\n<h1>404</h1>\n<p>Page not found.</p>\n</section>")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use chrono::Utc;

    use super::{app, blog, dashboard, escape_html, header, login, post};
    use crate::models::Post;

    fn sample_post(title: &str) -> Post {
        let now = Utc::now();
        Post {
            id: 1,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            slug: String::from("sample"),
            title: title.to_string(),
            content: String::from("first\n\nsecond <b>"),
            user_id: 1,
        }
    }

    #[test]
    fn escape_html_covers_markup() {
        assert_eq!(
            escape_html(r#"<a href="x">'&'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;&#39;&amp;&#39;&lt;/a&gt;"
        );
    }

    #[test]
    fn post_content_is_escaped_and_split() {
        let html = post(&sample_post("<script>"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(html.contains("<p>first</p>"));
        assert!(html.contains("<p>second &lt;b&gt;</p>"));
    }

    #[test]
    fn anonymous_header_links_to_login() {
        let html = header(None);
        assert!(html.contains("/login"));
        assert!(!html.contains("/logout"));
    }

    #[test]
    fn forms_embed_csrf_token() {
        assert!(login("tok\"en").contains("value=\"tok&quot;en\""));
        assert!(dashboard(&[("Post", 1)], &[], "abc").contains("value=\"abc\""));
    }

    #[test]
    fn blog_lists_posts_or_placeholder() {
        assert!(blog(&[]).contains("No posts yet."));
        assert!(blog(&[sample_post("Hello")]).contains("href=\"/blog/sample\""));
    }

    #[test]
    fn app_wraps_document() {
        let page = app("Juniper", "<header></header>", "<p>x</p>", "<footer></footer>").0;
        assert!(page.starts_with("<!DOCTYPE html>"));
        assert!(page.contains("<title>Juniper</title>"));
        assert!(page.contains("data-json-form"));
    }
}

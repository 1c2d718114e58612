use std::fmt::Write as _;

use crate::controller::ViewController;
use crate::models::{AnalysisResult, LifecycleState};
use crate::notify::{Notification, NotificationKind};

// ── Copy ─────────────────────────────────────────────────────────────────────

const APP_TITLE: &str = "تحلیلگر هوشمند بصیرت";
const APP_SUBTITLE: &str = "دستیار مقابله با جنگ ترکیبی و شایعات";
const INPUT_LABEL: &str = "متن، لینک یا شبهه مورد نظر را وارد کنید:";
const INPUT_PLACEHOLDER: &str = "مثال: متنی که در فضای مجازی دیده‌اید را اینجا کپی کنید...";
const ADD_IMAGE: &str = "افزودن تصویر (اختیاری)";
const CHANGE_IMAGE: &str = "تغییر تصویر";
const REMOVE_IMAGE: &str = "حذف تصویر";
const SUBMIT_LABEL: &str = "شروع تحلیل";
const BUSY_LABEL: &str = "در حال تحلیل هوشمند...";
const ERROR_HEADING: &str = "خطا در پردازش";
const RESULT_HEADING: &str = "نتیجه تحلیل بصیرتی";
const COPY_LABEL: &str = "کپی متن";
const DISCLAIMER: &str = "تحلیل تولید شده توسط هوش مصنوعی با نظارت کاربر قابل استفاده است.";

const URLENCODED: &str = "application/x-www-form-urlencoded";

/// Mirrors the empty-draft check on the submit button while typing, and copies
/// card text to the clipboard without leaving the page. Both degrade to plain
/// form posts without script.
const SCRIPT: &str = r#"
(function () {
  var text = document.getElementById('text');
  var submit = document.getElementById('submit');
  var hasImage = !!document.querySelector('img.preview');
  if (text && submit && submit.getAttribute('aria-busy') !== 'true') {
    var sync = function () { submit.disabled = !text.value.trim() && !hasImage; };
    text.addEventListener('input', sync);
    sync();
  }
  var notify = function (message) {
    var n = document.createElement('div');
    n.className = 'notice success';
    n.setAttribute('role', 'status');
    n.textContent = message;
    document.querySelector('main').prepend(n);
    setTimeout(function () { n.remove(); }, 3000);
  };
  document.querySelectorAll('form.copy-form').forEach(function (form) {
    form.addEventListener('submit', function (e) {
      if (!navigator.clipboard) { return; }
      e.preventDefault();
      fetch(form.action, { method: 'POST', headers: { 'Accept': 'application/json' }, credentials: 'same-origin' })
        .then(function (r) { return r.ok ? r.json() : Promise.reject(r.status); })
        .then(function (d) { return navigator.clipboard.writeText(d.text).then(function () { notify(d.notice); }); })
        .catch(function () {});
    });
  });
})();
"#;

/// Seconds between automatic reloads while an analysis is running.
const ANALYZING_REFRESH_SECS: u32 = 2;

const STYLE: &str = "
body{font-family:sans-serif;background:#f8fafc;color:#1e293b;margin:0}
header{background:#065f46;color:#fff;padding:1rem}
header p{margin:0;font-size:.8rem;opacity:.9}
main{max-width:48rem;margin:0 auto;padding:1.5rem 1rem}
.panel{background:#fff;border:1px solid #e5e7eb;border-radius:1rem;padding:1.5rem;margin-bottom:2rem}
textarea{width:100%;min-height:120px;box-sizing:border-box;padding:1rem}
.preview{height:4rem;width:4rem;object-fit:cover}
.error{background:#fef2f2;border-right:4px solid #ef4444;padding:1rem;margin-bottom:2rem}
.notice{background:#ecfdf5;border:1px solid #6ee7b7;padding:.5rem 1rem;margin-bottom:1rem}
.result-card{background:#fff;border:1px solid #f1f5f9;border-radius:.75rem;margin-bottom:1rem}
.result-card h3{margin:0;padding:.75rem 1rem;border-bottom:1px solid #f1f5f9}
.card-body{padding:1rem;white-space:pre-wrap;line-height:1.8}
.result-card.emphasized{border:2px solid #a7f3d0;background:#f0fdf4}
.footer-note{text-align:center;color:#64748b;font-size:.85rem}
";

// ── Page ─────────────────────────────────────────────────────────────────────

pub fn render_page(controller: &ViewController, notification: Option<&Notification>) -> String {
    let state = controller.state();
    let mut html = String::new();

    html.push_str("<!DOCTYPE html>\n<html lang=\"fa\" dir=\"rtl\">\n<head>\n<meta charset=\"utf-8\">\n");
    html.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n");
    if state == LifecycleState::Analyzing {
        let _ = writeln!(
            html,
            "<meta http-equiv=\"refresh\" content=\"{}\">",
            ANALYZING_REFRESH_SECS
        );
    }
    let _ = writeln!(html, "<title>{}</title>", escape(APP_TITLE));
    let _ = writeln!(html, "<style>{}</style>\n</head>\n<body>", STYLE);

    let _ = writeln!(
        html,
        "<header><h1>{}</h1><p>{}</p></header>\n<main>",
        escape(APP_TITLE),
        escape(APP_SUBTITLE)
    );

    if let Some(notice) = notification {
        let class = match notice.kind {
            NotificationKind::Success => "notice success",
            NotificationKind::Info => "notice info",
        };
        let _ = writeln!(
            html,
            "<div class=\"{}\" role=\"status\">{}</div>",
            class,
            escape(&notice.message)
        );
    }

    render_form(&mut html, controller);

    match state {
        LifecycleState::Error => {
            let message = controller.error_message().unwrap_or_default();
            let _ = writeln!(
                html,
                "<div class=\"error\" role=\"alert\"><h3>{}</h3><p>{}</p></div>",
                escape(ERROR_HEADING),
                escape(message)
            );
        }
        LifecycleState::Success => {
            if let Some(result) = controller.result() {
                render_result(&mut html, result);
            }
        }
        LifecycleState::Idle | LifecycleState::Analyzing => {}
    }

    html.push_str("</main>\n");
    let _ = writeln!(html, "<script>{}</script>", SCRIPT);
    html.push_str("</body>\n</html>\n");
    html
}

fn render_form(html: &mut String, controller: &ViewController) {
    let draft = controller.draft();
    let analyzing = controller.state() == LifecycleState::Analyzing;

    html.push_str("<div class=\"panel\">\n");

    // One form for the whole draft, so every action posts the current text.
    // The picker uploads to `/image`; the buttons override action and encoding.
    html.push_str(
        "<form id=\"draft-form\" method=\"post\" action=\"/image\" enctype=\"multipart/form-data\">\n",
    );
    let _ = writeln!(
        html,
        "<label for=\"text\">{}</label>\n<textarea id=\"text\" name=\"text\" dir=\"auto\" placeholder=\"{}\">{}</textarea>",
        escape(INPUT_LABEL),
        escape(INPUT_PLACEHOLDER),
        escape(&draft.text)
    );

    let _ = writeln!(
        html,
        "<label>{} <input type=\"file\" name=\"image\" accept=\"image/*\" onchange=\"this.form.submit()\"></label>",
        escape(if draft.image.is_some() { CHANGE_IMAGE } else { ADD_IMAGE })
    );
    html.push_str("<noscript><button type=\"submit\" id=\"upload-image\">⬆</button></noscript>\n");

    if let Some(image) = &draft.image {
        let _ = writeln!(
            html,
            "<div class=\"image-draft\"><img class=\"preview\" alt=\"Preview\" src=\"{}\">\
             <button type=\"submit\" id=\"clear-image\" formaction=\"/image/clear\" formenctype=\"{}\">{}</button></div>",
            escape(&image.to_data_url()),
            URLENCODED,
            escape(REMOVE_IMAGE)
        );
    }

    let disabled = if analyzing { " disabled" } else { "" };
    let label = if analyzing { BUSY_LABEL } else { SUBMIT_LABEL };
    let busy = if analyzing { " aria-busy=\"true\"" } else { "" };
    let _ = writeln!(
        html,
        "<button type=\"submit\" id=\"submit\" formaction=\"/analyze\" formenctype=\"{}\"{}{}>{}</button>",
        URLENCODED,
        disabled,
        busy,
        escape(label)
    );
    html.push_str("</form>\n</div>\n");
}

fn render_result(html: &mut String, result: &AnalysisResult) {
    let _ = writeln!(
        html,
        "<div class=\"results\">\n<h2>{}</h2>",
        escape(RESULT_HEADING)
    );

    for (section, content) in result.sections() {
        let class = if section.emphasized() {
            "result-card emphasized"
        } else {
            "result-card"
        };
        let _ = write!(
            html,
            "<section class=\"{}\" data-section=\"{}\"><h3>{}</h3>",
            class,
            section.key(),
            escape(section.title())
        );
        if section.copyable() {
            let _ = write!(
                html,
                "<form class=\"copy-form\" method=\"post\" action=\"/copy/{}\"><button type=\"submit\" class=\"copy\">{}</button></form>",
                section.key(),
                escape(COPY_LABEL)
            );
        }
        let _ = writeln!(
            html,
            "<div class=\"card-body\">{}</div></section>",
            escape(content)
        );
    }

    let _ = writeln!(
        html,
        "<p class=\"footer-note\">{}</p>\n</div>",
        escape(DISCLAIMER)
    );
}

/// Minimal HTML text/attribute escaping.
pub fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gemini::AnalysisError;
    use crate::image::ImagePayload;
    use scraper::{Html, Selector};

    fn result() -> AnalysisResult {
        AnalysisResult {
            fact_check: "A".into(),
            insult_check: "B".into(),
            soft_war_check: "C".into(),
            source_origin: "D".into(),
            argument: "E".into(),
            suggested_response: "F".into(),
            religious_quote: "G".into(),
        }
    }

    fn select<'a>(doc: &'a Html, css: &str) -> Vec<scraper::ElementRef<'a>> {
        let sel = Selector::parse(css).unwrap();
        doc.select(&sel).collect()
    }

    fn text_of(el: &scraper::ElementRef<'_>) -> String {
        el.text().collect::<String>()
    }

    #[test]
    fn idle_page_shows_only_the_form() {
        let controller = ViewController::new();
        let doc = Html::parse_document(&render_page(&controller, None));

        assert_eq!(select(&doc, "form#draft-form").len(), 1);
        assert!(select(&doc, ".error").is_empty());
        assert!(select(&doc, ".result-card").is_empty());
        assert!(select(&doc, "meta[http-equiv=refresh]").is_empty());
    }

    #[test]
    fn fresh_page_lets_the_user_type_and_submit() {
        let doc = Html::parse_document(&render_page(&ViewController::new(), None));

        // the server cannot see typed text, so only Analyzing disables submit
        let button = select(&doc, "button#submit")[0];
        assert!(button.value().attr("disabled").is_none());
        assert_eq!(button.value().attr("formaction"), Some("/analyze"));

        let script: String = select(&doc, "script").iter().map(text_of).collect();
        assert!(script.contains("addEventListener('input'"));
    }

    #[test]
    fn every_draft_action_posts_the_text() {
        let mut controller = ViewController::new();
        controller.set_text("متن");
        controller.select_image(ImagePayload {
            bytes: vec![1],
            mime_type: "image/png".into(),
            file_name: None,
        });
        let doc = Html::parse_document(&render_page(&controller, None));

        let form = select(&doc, "form#draft-form")[0];
        let field_names: Vec<&str> = form
            .select(&Selector::parse("textarea, input").unwrap())
            .filter_map(|el| el.value().attr("name"))
            .collect();
        assert_eq!(field_names, vec!["text", "image"]);
        assert_eq!(form.value().attr("action"), Some("/image"));

        let actions: Vec<&str> = form
            .select(&Selector::parse("button[formaction]").unwrap())
            .filter_map(|el| el.value().attr("formaction"))
            .collect();
        assert_eq!(actions, vec!["/image/clear", "/analyze"]);
    }

    #[test]
    fn analyzing_page_disables_submit_and_refreshes() {
        let mut controller = ViewController::new();
        controller.set_text("x");
        controller.begin_submit();
        let doc = Html::parse_document(&render_page(&controller, None));

        let button = select(&doc, "button#submit")[0];
        assert!(button.value().attr("disabled").is_some());
        assert_eq!(text_of(&button), BUSY_LABEL);
        assert_eq!(select(&doc, "meta[http-equiv=refresh]").len(), 1);
        assert_eq!(text_of(&select(&doc, "textarea#text")[0]), "x");
    }

    #[test]
    fn error_page_shows_banner_with_message() {
        let mut controller = ViewController::new();
        controller.set_text("x");
        controller.begin_submit();
        controller.finish(Err(AnalysisError::NoResponse));
        let doc = Html::parse_document(&render_page(&controller, None));

        let banner = select(&doc, ".error");
        assert_eq!(banner.len(), 1);
        assert!(text_of(&banner[0]).contains("No response received from AI"));
        assert_eq!(select(&doc, "form#draft-form").len(), 1);
    }

    #[test]
    fn success_page_renders_seven_cards_in_order() {
        let mut controller = ViewController::new();
        controller.set_text("شایعه ۱");
        controller.begin_submit();
        controller.finish(Ok(result()));
        let doc = Html::parse_document(&render_page(&controller, None));

        let bodies: Vec<String> = select(&doc, ".result-card .card-body")
            .iter()
            .map(text_of)
            .collect();
        assert_eq!(bodies, vec!["A", "B", "C", "D", "E", "F", "G"]);

        let emphasized = select(&doc, ".result-card.emphasized");
        assert_eq!(emphasized.len(), 1);
        assert_eq!(emphasized[0].value().attr("data-section"), Some("suggestedResponse"));

        let copy_targets: Vec<&str> = select(&doc, ".result-card form.copy-form")
            .iter()
            .filter_map(|f| f.value().attr("action"))
            .collect();
        assert_eq!(copy_targets, vec!["/copy/argument", "/copy/suggestedResponse"]);
    }

    #[test]
    fn image_preview_and_notice_are_rendered() {
        let mut controller = ViewController::new();
        controller.select_image(ImagePayload {
            bytes: vec![1, 2, 3],
            mime_type: "image/png".into(),
            file_name: None,
        });
        let notice = Notification::success("متن کپی شد");
        let doc = Html::parse_document(&render_page(&controller, Some(&notice)));

        let preview = select(&doc, "img.preview");
        assert_eq!(preview[0].value().attr("src"), Some("data:image/png;base64,AQID"));
        assert_eq!(select(&doc, "button#clear-image").len(), 1);
        assert_eq!(text_of(&select(&doc, ".notice")[0]), "متن کپی شد");
    }

    #[test]
    fn user_text_is_escaped() {
        let mut controller = ViewController::new();
        controller.set_text("<script>alert(1)</script>");
        let page = render_page(&controller, None);
        assert!(!page.contains("<script>alert"));
        assert!(page.contains("&lt;script&gt;"));
    }
}

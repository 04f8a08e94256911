//! Server-rendered pages
//!
//! Plain strings, no template engine. Every piece of hub-provided text goes
//! through [`escape`] and every id placed in a URL through `urlencoding`.

use std::fmt::Write;

use crate::dashboard::{AreaView, DashboardData};
use crate::gateway::{self, Entity};
use crate::ranking::RankedEntity;

const STYLE: &str = "\
body{font-family:system-ui,sans-serif;margin:0;padding:1rem;background:#111;color:#eee}\
h1,h2{font-weight:500}\
a{color:inherit;text-decoration:none}\
.grid{display:grid;grid-template-columns:repeat(auto-fill,minmax(9rem,1fr));gap:.75rem}\
.tile{display:block;padding:1rem;border-radius:.5rem;background:#2a2a2a}\
.tile.scene{background:#23364a}\
.tile .count{display:block;font-size:.8rem;opacity:.6}\
.tile.done{outline:2px solid #4caf50}\
.tile.fail{outline:2px solid #e53935}\
.empty{opacity:.6}";

/// Activation links fall back to a full page load without JavaScript
const SCRIPT: &str = r#"document.addEventListener("click",async e=>{
const a=e.target.closest("a.tile");if(!a)return;e.preventDefault();
a.classList.remove("done","fail");
try{const r=await fetch(a.href,{headers:{Accept:"application/json"}});
const b=await r.json();a.classList.add(b.success?"done":"fail");}
catch(_){a.classList.add("fail");}});"#;

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
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

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
         <title>{title}</title>\n<style>{STYLE}</style>\n</head>\n<body>\n{body}\
         <script>{SCRIPT}</script>\n</body>\n</html>\n",
        title = escape(title),
    )
}

fn tile(out: &mut String, entity_id: &str, name: &str, count: Option<u64>) {
    let _ = write!(
        out,
        "<a class=\"tile {domain}\" href=\"/activate/{href}\">{name}",
        domain = escape(gateway::domain_of(entity_id)),
        href = urlencoding::encode(entity_id),
        name = escape(name),
    );
    if let Some(count) = count {
        let _ = write!(out, "<span class=\"count\">{count}\u{d7}</span>");
    }
    out.push_str("</a>\n");
}

fn entity_grid(out: &mut String, entities: &[Entity]) {
    if entities.is_empty() {
        out.push_str("<p class=\"empty\">Nothing here yet.</p>\n");
        return;
    }
    out.push_str("<div class=\"grid\">\n");
    for entity in entities {
        tile(out, &entity.entity_id, &entity.name, None);
    }
    out.push_str("</div>\n");
}

fn most_used_grid(out: &mut String, ranked: &[RankedEntity]) {
    out.push_str("<section>\n<h2>Right now</h2>\n");
    if ranked.is_empty() {
        out.push_str("<p class=\"empty\">No activations around this time yet.</p>\n");
    } else {
        out.push_str("<div class=\"grid\">\n");
        for entry in ranked {
            tile(out, &entry.entity_id, &entry.name, Some(entry.count));
        }
        out.push_str("</div>\n");
    }
    out.push_str("</section>\n");
}

pub fn dashboard_page(data: &DashboardData) -> String {
    let mut body = String::from("<h1>Launchpad</h1>\n");
    most_used_grid(&mut body, &data.most_used);

    if data.areas.is_empty() {
        body.push_str("<p class=\"empty\">No scripts or scenes available.</p>\n");
    }
    for area in &data.areas {
        let _ = write!(
            body,
            "<section>\n<h2><a href=\"/area/{href}\">{name}</a></h2>\n",
            href = urlencoding::encode(&area.area_id),
            name = escape(&area.name),
        );
        let members = data
            .entities_by_area
            .get(&area.area_id)
            .map(Vec::as_slice)
            .unwrap_or_default();
        entity_grid(&mut body, members);
        body.push_str("</section>\n");
    }

    page("Launchpad", &body)
}

pub fn area_page(view: &AreaView) -> String {
    let mut body = format!(
        "<p><a href=\"/\">&larr; All areas</a></p>\n<h1>{}</h1>\n",
        escape(&view.name)
    );
    entity_grid(&mut body, &view.entities);
    page(&view.name, &body)
}

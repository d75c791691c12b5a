//! Server-rendered HTML for the operator pages.

use std::fmt::Write as _;

use misting_core::relay::{Relay, RelayState};
use misting_core::sensors::Sensor;

pub const LOGIN_PAGE: &str = concat!(
    "<!DOCTYPE html><html><head><title>Misting login</title></head>",
    "<body style=\"font-family:sans-serif;padding:2rem\">",
    "<h1>Login</h1>",
    "<form method=\"post\" action=\"/login\">",
    "<label for=\"name\">User name</label> ",
    "<input type=\"text\" id=\"name\" name=\"name\"> ",
    "<label for=\"password\">Password</label> ",
    "<input type=\"password\" id=\"password\" name=\"password\"> ",
    "<button type=\"submit\">Login</button>",
    "</form></body></html>",
);

pub fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn row_class(state: RelayState) -> &'static str {
    match state {
        RelayState::On => "table-primary",
        RelayState::Off => "table-light",
    }
}

pub fn status_page(temperatures: &[Sensor], relays: &[Relay]) -> String {
    let mut html = String::from(concat!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\">",
        "<title>Misting</title></head>",
        "<body style=\"font-family:sans-serif;padding:2rem\">",
        "<h1>Misting</h1>",
    ));

    html.push_str("<h2>Temperature</h2><table><tr><th>Sensor</th><th>&deg;C</th></tr>");
    if temperatures.is_empty() {
        html.push_str("<tr><td colspan=\"2\">no readings</td></tr>");
    }
    for sensor in temperatures {
        let _ = write!(
            html,
            "<tr><td>{}</td><td>{:.2}</td></tr>",
            escape(&sensor.id),
            sensor.value
        );
    }
    html.push_str("</table>");

    html.push_str(
        "<h2>Systems</h2><table><tr><th>System</th><th>Pin</th><th>State</th>\
         <th>Run till</th><th></th></tr>",
    );
    for relay in relays {
        let toggle = relay.state.toggled();
        let _ = write!(
            html,
            "<tr class=\"{}\"><td>{}</td><td>{}</td><td>{}</td><td>{}</td>\
             <td><a href=\"/switch?pin={}&amp;state={}\">Turn {}</a></td></tr>",
            row_class(relay.state),
            escape(&relay.description),
            relay.pin,
            relay.state.label(),
            relay.run_till.format("%Y-%m-%d %H:%M:%S UTC"),
            relay.pin,
            toggle.as_str(),
            toggle.as_str(),
        );
    }
    html.push_str("</table><p><a href=\"/logout\">Log out</a></p></body></html>");
    html
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markup() {
        assert_eq!(
            escape("<b>\"A&B\"</b>"),
            "&lt;b&gt;&quot;A&amp;B&quot;&lt;/b&gt;"
        );
    }

    #[test]
    fn status_page_links_to_the_opposite_state() {
        let mut on = Relay::provisioned(2, "System A", 6);
        on.state = RelayState::On;
        let off = Relay::provisioned(3, "System <B>", 7);
        let html = status_page(
            &[Sensor {
                id: "28-01".into(),
                value: 21.5,
            }],
            &[on, off],
        );
        assert!(html.contains("/switch?pin=6&amp;state=off"));
        assert!(html.contains("/switch?pin=7&amp;state=on"));
        assert!(html.contains("table-primary"));
        assert!(html.contains("System &lt;B&gt;"));
        assert!(html.contains("21.50"));
    }
}

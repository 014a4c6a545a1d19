//! HTML served by the callback listener

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\">\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\
         <title>{title}</title>\
         <style>body{{font-family:sans-serif;background:#121212;color:#fff;\
         text-align:center;padding:2em}}a{{color:#1db954}}</style></head>\
         <body><h1>{title}</h1>{body}</body></html>"
    )
}

pub fn waiting(auth_url: &str) -> String {
    page(
        "Spotify Controller",
        &format!(
            "<p>Waiting for authorization.</p><p><a href=\"{}\">Log in with Spotify</a></p>",
            escape(auth_url)
        ),
    )
}

pub fn connected() -> String {
    page(
        "Connected",
        "<p>Your device is linked to Spotify. You can close this page.</p>",
    )
}

pub fn failed(reason: &str) -> String {
    page(
        "Authorization failed",
        &format!(
            "<p>{}</p><p>Start the login again from the device.</p>",
            escape(reason)
        ),
    )
}

pub fn not_found() -> String {
    page("Not found", "<p>Nothing here.</p>")
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

use axum::response::{Html, IntoResponse};
use maud::{DOCTYPE, PreEscaped, html};

use super::CSS;

pub async fn index_page() -> impl IntoResponse {
    let markup = html! {
        (DOCTYPE)
        html {
            head {
                title { "Relay Chat" }
                meta charset="utf-8";
                meta name="viewport" content="width=device-width, initial-scale=1";
                style { (PreEscaped(CSS)) }
            }
            body {
                div class="chat__app-container" {
                    div class="chat__list-container" id="member-list" {
                        h3 { "No one has joined yet" }
                    }
                    div class="chat__message-container" {
                        div class="message-container" id="message-log" {}
                        input type="text" id="message-text" size="64" autofocus
                            placeholder="Type your message";
                    }
                }
                script src="/public/js/chat.js" {}
            }
        }
    };

    Html(markup.into_string())
}

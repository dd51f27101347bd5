mod index;

pub use index::index_page;

pub const CSS: &str = r#"
body {
    font-family: system-ui, -apple-system, sans-serif;
    background: #111827;
    color: #e5e7eb;
    margin: 0;
}
.chat__app-container {
    max-width: 40rem;
    margin: 3rem auto;
    padding: 1.5rem;
    background: #1f2937;
    border-radius: 0.5rem;
}
.chat__list-container select,
.chat__message-container input {
    width: 100%;
    padding: 0.5rem;
    margin-top: 0.5rem;
    background: #374151;
    color: inherit;
    border: 1px solid #4b5563;
    border-radius: 0.25rem;
}
.message-container {
    min-height: 3rem;
    margin: 1rem 0;
    white-space: pre-wrap;
}
.message-container .status {
    color: #9ca3af;
    font-style: italic;
}
"#;

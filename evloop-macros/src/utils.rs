use proc_macro::{Delimiter, TokenStream, TokenTree};

/// Options accepted by `#[evloop::test(...)]`.
#[derive(Default)]
pub(crate) struct TestOptions {
    /// Variant name of `evloop::Backend`, e.g. `Poll`.
    pub(crate) backend: Option<String>,
}

/// Splits a `TokenStream` into comma-separated arguments.
///
/// Each argument is returned as a `Vec<TokenTree>`.
/// Commas at the top level are used as separators.
pub(crate) fn split_args(input: TokenStream) -> Vec<Vec<TokenTree>> {
    let mut args = Vec::new();
    let mut current = Vec::new();

    for token in input {
        match &token {
            TokenTree::Punct(p) if p.as_char() == ',' => {
                if !current.is_empty() {
                    args.push(current);
                    current = Vec::new();
                }
            }
            _ => current.push(token),
        }
    }

    if !current.is_empty() {
        args.push(current);
    }

    args
}

/// Parses `key = "value"` pairs.
pub(crate) fn parse_options(attr: TokenStream) -> Result<TestOptions, String> {
    let mut options = TestOptions::default();

    for arg in split_args(attr) {
        let (key, value) = match arg.as_slice() {
            [TokenTree::Ident(key), TokenTree::Punct(eq), TokenTree::Literal(value)]
                if eq.as_char() == '=' =>
            {
                (key.to_string(), value.to_string())
            }
            _ => {
                return Err(format!(
                    "expected `key = \"value\"`, found `{}`",
                    tokens_to_string(&arg)
                ));
            }
        };

        let value = value.trim_matches('"');

        match key.as_str() {
            "backend" => {
                let variant = match value.to_ascii_lowercase().as_str() {
                    "epoll" => "Epoll",
                    "poll" => "Poll",
                    other => return Err(format!("unknown backend `{other}`")),
                };
                options.backend = Some(variant.to_string());
            }
            other => return Err(format!("unknown option `{other}`")),
        }
    }

    Ok(options)
}

/// Returns the name bound by the first parameter of a test function, if
/// it has one (`event_loop` in `fn t(event_loop: &EventLoop)`).
pub(crate) fn binding_name(params: TokenStream) -> Option<String> {
    let tokens: Vec<TokenTree> = params.into_iter().collect();

    match tokens.as_slice() {
        [TokenTree::Ident(name), TokenTree::Punct(colon), ..] if colon.as_char() == ':' => {
            Some(name.to_string())
        }
        _ => None,
    }
}

/// Position of the parameter list following `fn name`.
pub(crate) fn params_position(tokens: &[TokenTree]) -> Option<usize> {
    let fn_pos = tokens
        .iter()
        .position(|t| matches!(t, TokenTree::Ident(id) if id.to_string() == "fn"))?;

    match tokens.get(fn_pos + 2) {
        Some(TokenTree::Group(g)) if g.delimiter() == Delimiter::Parenthesis => Some(fn_pos + 2),
        _ => None,
    }
}

/// Converts a slice of tokens into a Rust source string.
///
/// Inserts spaces between consecutive identifiers to avoid accidental
/// token merging (e.g. `foo bar` vs `foobar`).
pub(crate) fn tokens_to_string(tokens: &[TokenTree]) -> String {
    let mut out = String::new();
    let mut prev_was_ident = false;

    for t in tokens {
        let needs_space = prev_was_ident && matches!(t, TokenTree::Ident(_));

        if needs_space {
            out.push(' ');
        }

        out.push_str(&t.to_string());
        prev_was_ident = matches!(t, TokenTree::Ident(_));
    }

    out
}

/// Builds a `compile_error!` invocation carrying `msg`.
pub(crate) fn compile_error(msg: &str) -> TokenStream {
    format!("compile_error!({msg:?});")
        .parse()
        .unwrap_or_default()
}

mod utils;

use proc_macro::{Delimiter, Group, TokenStream, TokenTree};

/// Runs a test against a fresh event loop dispatched on a background thread.
///
/// The test function may take one parameter of type `&EventLoop`, which is
/// bound to the loop. The dispatcher is stopped when the body returns.
///
/// ```rust,ignore
/// #[evloop::test]
/// fn fires(event_loop: &evloop::EventLoop) { /* ... */ }
///
/// #[evloop::test(backend = "poll")]
/// fn fires_with_poll(event_loop: &evloop::EventLoop) { /* ... */ }
/// ```
///
/// Without a `backend` option the loop honours `EVLOOP_BACKEND`.
#[proc_macro_attribute]
pub fn test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let options = match utils::parse_options(attr) {
        Ok(options) => options,
        Err(msg) => return utils::compile_error(&format!("evloop::test: {msg}")),
    };

    let mut tokens = item.into_iter().collect::<Vec<_>>();

    let Some(params_pos) = utils::params_position(&tokens) else {
        return utils::compile_error("evloop::test must be applied to a function");
    };

    let binding = match &tokens[params_pos] {
        TokenTree::Group(g) => utils::binding_name(g.stream()),
        _ => None,
    };

    tokens[params_pos] = TokenTree::Group(Group::new(Delimiter::Parenthesis, TokenStream::new()));

    let Some(pos) = tokens
        .iter()
        .rposition(|t| matches!(t, TokenTree::Group(g) if g.delimiter() == Delimiter::Brace))
    else {
        return utils::compile_error("evloop::test requires a function body");
    };

    let block = match &tokens[pos] {
        TokenTree::Group(g) => g.stream().to_string(),
        _ => unreachable!(),
    };

    let builder = match &options.backend {
        Some(variant) => {
            format!("::evloop::EventLoop::builder().backend(::evloop::Backend::{variant})")
        }
        None => String::from(
            "::evloop::EventLoopBuilder::from_env().expect(\"invalid EVLOOP_* environment\")",
        ),
    };

    let bind = binding
        .map(|name| format!("let {name}: &::evloop::EventLoop = &__evloop;"))
        .unwrap_or_default();

    let new_block = format!(
        "{{
        let __evloop = {builder}.build().expect(\"failed to build event loop\");
        let __dispatcher = __evloop
            .spawn_dispatcher()
            .expect(\"failed to spawn dispatch thread\");
        {{
            {bind}
            {block}
        }}
        __dispatcher.stop().expect(\"dispatch thread failed\");
    }}"
    );

    let new_block = match new_block.parse() {
        Ok(stream) => stream,
        Err(err) => return utils::compile_error(&format!("evloop::test: {err}")),
    };

    tokens[pos] = TokenTree::Group(Group::new(Delimiter::Brace, new_block));

    let test_attr: TokenStream = "#[test]".parse().unwrap_or_default();
    let mut result: Vec<TokenTree> = test_attr.into_iter().collect();
    result.extend(tokens);

    result.into_iter().collect()
}

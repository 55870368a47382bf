use proc_macro2::{Span, TokenStream};
use quote::{quote, quote_spanned};
use syn::parse::Parser;
use syn::spanned::Spanned;

use crate::parse::*;

// syn::AttributeArgs does not implement syn::Parse
type AttributeArgs = syn::punctuated::Punctuated<syn::Meta, syn::Token![,]>;

/// Config used in case of the attribute not being able to build a valid config
const DEFAULT_ERROR_CONFIG: FinalConfig = FinalConfig {
    worker_threads: None,
    thread_name: None,
};

/// For quickstart on how this works, let's analyze this example:
///
/// ```rust,no_run
/// #[staccato::main(worker_threads = 2)]
/// fn main(ts: &staccato::Scheduler) {
///     println!("{} workers", ts.num_task_threads());
/// }
/// ```
///
/// The compiler splits the tokens where args is everything between the
/// proc_macro parentheses:
/// - `worker_threads = 2`
///
/// And item is the function the macro wraps. The expansion builds the
/// scheduler from the args, binds the function body to a closure over its
/// single scheduler argument, runs it, and drains the scheduler afterwards.
pub(crate) fn main(args: TokenStream, item: TokenStream) -> TokenStream {
    // If any of the steps for this macro fail, we still want to expand to an item that is as close
    // to the expected output as possible. This helps out IDEs such that completions and other
    // related features keep working.
    let input: syn::ItemFn = match syn::parse2(item.clone()) {
        Ok(it) => it,
        Err(e) => return token_stream_with_error(item, e),
    };

    let config = AttributeArgs::parse_terminated
        .parse2(args)
        .and_then(|args| build_config(&input, args, false));

    match config {
        Ok(config) => parse_knobs(input, false, config),
        Err(e) => token_stream_with_error(parse_knobs(input, false, DEFAULT_ERROR_CONFIG), e),
    }
}

pub(crate) fn test(args: TokenStream, item: TokenStream) -> TokenStream {
    let input: syn::ItemFn = match syn::parse2(item.clone()) {
        Ok(it) => it,
        Err(e) => return token_stream_with_error(item, e),
    };
    let config = if let Some(attr) = input.attrs.iter().find(|attr| is_test_attribute(attr)) {
        let msg = "second test attribute is supplied, consider removing or changing the order of your test attributes";
        Err(syn::Error::new_spanned(attr, msg))
    } else {
        AttributeArgs::parse_terminated
            .parse2(args)
            .and_then(|args| build_config(&input, args, true))
    };

    match config {
        Ok(config) => parse_knobs(input, true, config),
        Err(e) => token_stream_with_error(parse_knobs(input, true, DEFAULT_ERROR_CONFIG), e),
    }
}

pub(crate) struct FinalConfig {
    worker_threads: Option<usize>,
    thread_name: Option<String>,
}

struct ConfigBuilder {
    worker_threads: Option<(usize, Span)>,
    thread_name: Option<(String, Span)>,
    is_test: bool,
}

impl ConfigBuilder {
    fn new(is_test: bool) -> Self {
        ConfigBuilder {
            worker_threads: None,
            thread_name: None,
            is_test,
        }
    }

    fn macro_name(&self) -> &'static str {
        if self.is_test {
            "staccato::test"
        } else {
            "staccato::main"
        }
    }

    fn set_worker_threads(
        &mut self,
        worker_threads: syn::Lit,
        span: Span,
    ) -> Result<(), syn::Error> {
        if self.worker_threads.is_some() {
            return Err(syn::Error::new(
                span,
                "`worker_threads` set multiple times.",
            ));
        }

        let worker_threads = parse_int(worker_threads, span, "worker_threads")?;
        if worker_threads == 0 {
            return Err(syn::Error::new(span, "`worker_threads` may not be 0."));
        }
        self.worker_threads = Some((worker_threads, span));

        Ok(())
    }

    fn set_thread_name(&mut self, thread_name: syn::Lit, span: Span) -> Result<(), syn::Error> {
        if self.thread_name.is_some() {
            return Err(syn::Error::new(span, "`thread_name` set multiple times."));
        }

        let thread_name = parse_string(thread_name, span, "thread_name")?;
        self.thread_name = Some((thread_name, span));

        Ok(())
    }

    fn build(&self) -> Result<FinalConfig, syn::Error> {
        Ok(FinalConfig {
            worker_threads: self.worker_threads.map(|(n, _)| n),
            thread_name: self.thread_name.clone().map(|(name, _)| name),
        })
    }
}

fn build_config(
    input: &syn::ItemFn,
    args: AttributeArgs,
    is_test: bool,
) -> Result<FinalConfig, syn::Error> {
    if input.sig.asyncness.is_some() {
        let msg = "the function cannot be `async`; the scheduler is synchronous";
        return Err(syn::Error::new_spanned(input.sig.fn_token, msg));
    }

    if input.sig.inputs.len() != 1 {
        let msg = format!(
            "the function must take the scheduler as its only argument, e.g. `fn {}(ts: &staccato::Scheduler)`",
            input.sig.ident,
        );
        return Err(syn::Error::new_spanned(&input.sig.ident, msg));
    }

    let mut config = ConfigBuilder::new(is_test);
    let macro_name = config.macro_name();

    for arg in args {
        match arg {
            syn::Meta::NameValue(namevalue) => {
                let ident = namevalue
                    .path
                    .get_ident()
                    .ok_or_else(|| {
                        syn::Error::new_spanned(&namevalue, "Must have specified ident")
                    })?
                    .to_string()
                    .to_lowercase();
                let lit = match &namevalue.value {
                    syn::Expr::Lit(syn::ExprLit { lit, .. }) => lit,
                    expr => return Err(syn::Error::new_spanned(expr, "Must be a literal")),
                };
                match ident.as_str() {
                    "worker_threads" => {
                        config.set_worker_threads(lit.clone(), lit.span())?;
                    }
                    "thread_name" => {
                        config.set_thread_name(lit.clone(), lit.span())?;
                    }
                    name => {
                        let msg = format!(
                            "Unknown attribute {name} is specified; expected one of: `worker_threads`, `thread_name`",
                        );
                        return Err(syn::Error::new_spanned(namevalue, msg));
                    }
                }
            }
            syn::Meta::Path(path) => {
                let name = path
                    .get_ident()
                    .ok_or_else(|| syn::Error::new_spanned(&path, "Must have specified ident"))?
                    .to_string()
                    .to_lowercase();
                let msg = match name.as_str() {
                    "worker_threads" | "thread_name" => {
                        format!("The `{name}` attribute requires an argument.")
                    }
                    name => {
                        format!(
                            "Unknown attribute {name} is specified; expected one of: `worker_threads`, `thread_name`. Used with #[{macro_name}].",
                        )
                    }
                };
                return Err(syn::Error::new_spanned(path, msg));
            }
            other => {
                return Err(syn::Error::new_spanned(
                    other,
                    "Unknown attribute inside the macro",
                ));
            }
        }
    }

    config.build()
}

fn parse_knobs(input: syn::ItemFn, is_test: bool, config: FinalConfig) -> TokenStream {
    // If type mismatch occurs, point rustc at the last statement of the
    // body rather than the whole function.
    let body_span = input
        .block
        .stmts
        .last()
        .map_or_else(Span::call_site, |stmt| stmt.span());

    let mut builder = quote_spanned! {body_span=>
        staccato::Builder::new()
    };

    if let Some(v) = config.worker_threads {
        builder = quote_spanned! {body_span=> #builder.worker_threads(#v) };
    }

    if let Some(v) = config.thread_name {
        builder = quote_spanned! {body_span=> #builder.thread_name(#v) };
    }

    let generated_attrs = if is_test {
        quote! {
            #[::core::prelude::v1::test]
        }
    } else {
        quote! {}
    };

    let syn::ItemFn {
        mut attrs,
        vis,
        mut sig,
        block,
    } = input;

    // Inner attributes are not valid on the block we expand into; lift them
    // onto the wrapper function instead.
    for attr in &mut attrs {
        attr.style = syn::AttrStyle::Outer;
    }

    // The wrapper takes no arguments; the body receives the scheduler
    // through a closure over the original argument. When the signature was
    // rejected by `build_config` we still expand with a placeholder so IDE
    // features keep working next to the emitted error.
    let scheduler_arg = sig.inputs.first().cloned();
    sig.inputs.clear();

    let bind_body = match &scheduler_arg {
        Some(arg) => quote! { let body = |#arg| #block; },
        None => quote! { let body = |_: &staccato::Scheduler| #block; },
    };

    // This explicit `return` is intentional: the scheduler must be drained
    // and stopped before the wrapper returns the body's output.
    let run = quote_spanned! {body_span=>
        #[allow(clippy::expect_used)]
        {
            let __scheduler = #builder
                .try_build()
                .expect("Failed building the Scheduler");
            let __output = body(&__scheduler);
            __scheduler.wait_for_all_and_shutdown();
            return __output;
        }
    };

    quote! {
        #(#attrs)*
        #generated_attrs
        #vis #sig {
            #bind_body
            #run
        }
    }
}

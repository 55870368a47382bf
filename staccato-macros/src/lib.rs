#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

//! Attribute macros for use with Staccato.

mod entry;
mod parse;

/// Builds a scheduler and hands it to `main`, which must take it as its only
/// argument. The scheduler is drained and shut down when the body returns.
///
/// ```ignore
/// #[staccato::main(worker_threads = 4)]
/// fn main(ts: &staccato::Scheduler) {
///     assert_eq!(ts.num_task_threads(), 4);
/// }
/// ```
///
/// Equivalent code not using `#[staccato::main]`
///
/// ```ignore
/// fn main() {
///     let ts = staccato::Builder::new()
///         .worker_threads(4)
///         .try_build()
///         .unwrap();
///     assert_eq!(ts.num_task_threads(), 4);
///     ts.wait_for_all_and_shutdown();
/// }
/// ```
///
/// `worker_threads` defaults to the number of cpus on the system. The thread
/// name prefix can be overridden with `thread_name = "..."`.
#[proc_macro_attribute]
pub fn main(
    args: proc_macro::TokenStream,
    item: proc_macro::TokenStream,
) -> proc_macro::TokenStream {
    entry::main(args.into(), item.into()).into()
}

/// Like [`macro@main`], for tests: marks the function as a `#[test]`, builds
/// a scheduler per invocation, and passes it as the function's only
/// argument.
///
/// ```ignore
/// #[staccato::test(worker_threads = 2)]
/// fn two_workers(ts: &staccato::Scheduler) {
///     assert_eq!(ts.num_task_threads(), 2);
/// }
/// ```
///
/// Equivalent code not using `#[staccato::test]`
///
/// ```ignore
/// #[test]
/// fn two_workers() {
///     let ts = staccato::Builder::new()
///         .worker_threads(2)
///         .try_build()
///         .unwrap();
///     assert_eq!(ts.num_task_threads(), 2);
///     ts.wait_for_all_and_shutdown();
/// }
/// ```
#[proc_macro_attribute]
pub fn test(
    args: proc_macro::TokenStream,
    item: proc_macro::TokenStream,
) -> proc_macro::TokenStream {
    entry::test(args.into(), item.into()).into()
}

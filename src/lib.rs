mod densemap;
pub mod fs;
pub mod graph;
pub mod job;
pub mod makefile;
pub mod parse;
pub mod run;
mod scanner;
pub mod task;
pub mod work;

#[cfg(not(windows))]
use jemallocator::Jemalloc;

#[cfg(not(windows))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

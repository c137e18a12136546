mod support;

mod concurrency;
mod pipeline;

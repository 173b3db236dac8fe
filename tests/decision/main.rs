mod batch;
mod support;

mod common;
mod tensors;

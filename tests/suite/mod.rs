mod lifecycle;
mod linting;

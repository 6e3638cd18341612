//! File-driven MIR tests live in `tests/`.

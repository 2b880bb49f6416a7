use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EmitError {
    #[error("branch placeholder #{0} backpatched twice")]
    DoublePatch(usize),

    #[error("instruction #{0} is not a branch placeholder")]
    NotABranch(usize),

    #[error("{count} branch placeholder(s) left dangling in method '{method}'")]
    DanglingPlaceholders { method: String, count: usize },

    #[error("label {0} points past the end of the method body")]
    LabelOutOfRange(usize),

    #[error("local slot {0} released twice or never allocated")]
    BadSlotRelease(u16),

    #[error("method #{0} declared but never defined")]
    UndefinedMethod(usize),

    #[error("method #{0} defined twice")]
    RedefinedMethod(usize),
}

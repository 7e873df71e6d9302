mod log;
mod operation;
mod page;
mod revision;

pub use log::RequestLogEntry;
pub use operation::{
    ActionStage, ActionType, DeleteOptions, DuplicateOptions, NewOperation, OperationEntry,
    OperationHandle, OperationOptions, OperationState, PageSnapshot, RenameOptions, ResumeReport,
    RevertOptions, SubStageBudget, SubStageOutcome,
};
pub use page::{
    ChildrenTarget, CreatePageOptions, Grant, ListPolicy, Page, PageInfo, PageInfoOptions,
    PageInfoSelector, PageStatus, ProcessData, StageProcessInfo, User,
};
pub use revision::{Attachment, NormalizeOutcome, Revision};

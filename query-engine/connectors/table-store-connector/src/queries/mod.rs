//! Statement execution, one module per statement family.
//!
//! Each entry point binds every parameter and builds every request before it talks to the
//! store, so binding and encoding errors never leave a partial write behind.

mod aggregate;
mod read;
mod write;

use crate::{
    ConnectorConfig, Param,
    filter::Binder,
    result::Outcome,
    statement::Statement,
    store::StoreHandle,
};

pub(crate) struct Context<'a> {
    pub store: &'a StoreHandle,
    pub config: &'a ConnectorConfig,
}

pub(crate) async fn execute(ctx: &Context<'_>, statement: &Statement, params: &[Param]) -> crate::Result<Outcome> {
    let mut binder = Binder::new(params);

    let outcome = match statement {
        Statement::Select(select) => read::select(ctx, select, &mut binder).await,
        Statement::SelectCount(count) => aggregate::count(ctx, count, &mut binder).await,
        Statement::Insert(insert) => write::insert(ctx, insert, &mut binder).await,
        Statement::Update(update) => write::update(ctx, update, &mut binder).await,
        Statement::Delete(delete) => write::delete(ctx, delete, &mut binder).await,
    };

    binder.finish();
    outcome
}

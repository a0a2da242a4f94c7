//! Lock table creation

use sea_orm::{ConnectionTrait, DbErr, EntityTrait, Schema};

use crate::entity::{reader_semaphore, reader_semaphore_slot, semaphore, semaphore_slot, writer_lock};

async fn create_table<C, E>(db: &C, schema: &Schema, entity: E) -> Result<(), DbErr>
where
    C: ConnectionTrait,
    E: EntityTrait,
{
    let backend = db.get_database_backend();
    let mut statement = schema.create_table_from_entity(entity);
    statement.if_not_exists();
    db.execute(backend.build(&statement)).await?;
    Ok(())
}

/// Create every lock table, parents before their slot tables
pub(crate) async fn create_tables<C: ConnectionTrait>(db: &C) -> Result<(), DbErr> {
    let schema = Schema::new(db.get_database_backend());

    create_table(db, &schema, writer_lock::Entity).await?;
    create_table(db, &schema, semaphore::Entity).await?;
    create_table(db, &schema, semaphore_slot::Entity).await?;
    create_table(db, &schema, reader_semaphore::Entity).await?;
    create_table(db, &schema, reader_semaphore_slot::Entity).await?;

    tracing::info!("lock tables are ready");
    Ok(())
}

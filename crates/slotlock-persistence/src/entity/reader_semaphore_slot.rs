//! Reader semaphore slot entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "reader_semaphore_slot")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub key: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub expiration: Option<i64>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::reader_semaphore::Entity",
        from = "Column::Key",
        to = "super::reader_semaphore::Column::Key",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    ReaderSemaphore,
}

impl Related<super::reader_semaphore::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ReaderSemaphore.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

//! Semaphore slot entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "semaphore_slot")]
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
        belongs_to = "super::semaphore::Entity",
        from = "Column::Key",
        to = "super::semaphore::Column::Key",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    Semaphore,
}

impl Related<super::semaphore::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Semaphore.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

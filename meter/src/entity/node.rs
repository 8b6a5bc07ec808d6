use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "nodes")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique)]
    pub name: String,
    /// `host:port` of the node's traffic API
    pub address: String,
    pub secret: String,
    pub enabled: bool,
    pub created_at: DateTime,
    pub last_sync_at: Option<DateTime>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::traffic_stat::Entity")]
    TrafficStat,
}

impl Related<super::traffic_stat::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TrafficStat.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

pub mod builder;
pub mod params;

pub use builder::{
    count, delete, insert, select_by_id, select_column_list, select_in, select_where, union_all,
    update, Order, QueryBuf,
};
pub use params::BindValue;

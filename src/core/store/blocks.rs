use postgres_from_row::FromRow;
use tokio_postgres::GenericClient;
use tracing::debug;

use crate::core::chain::ChainBlock;
use crate::core::types::Block;
use crate::core::types::BlockId;
use crate::core::types::BlockNumber;
use crate::core::types::Timestamp;

const COLUMNS: &str = "id, number, hash, timestamp";

/// Insert `blocks`, ignoring any with a hash that's already known.
///
/// Returns the newly inserted blocks, ordered by id.
pub(super) async fn insert(
    client: &impl GenericClient,
    blocks: &[ChainBlock],
) -> Result<Vec<Block>, tokio_postgres::Error> {
    let numbers: Vec<BlockNumber> = blocks.iter().map(|b| b.number).collect();
    let hashes: Vec<&str> = blocks.iter().map(|b| b.hash.as_str()).collect();
    let timestamps: Vec<Timestamp> = blocks.iter().map(|b| b.timestamp).collect();
    let stmt = "
        insert into etl.blocks (number, hash, timestamp)
        select * from unnest($1::bigint[], $2::text[], $3::timestamptz[])
        on conflict (hash) do nothing
        returning id, number, hash, timestamp;";
    let rows = client
        .query(stmt, &[&numbers, &hashes, &timestamps])
        .await?;
    let mut inserted = rows
        .iter()
        .map(Block::try_from_row)
        .collect::<Result<Vec<Block>, _>>()?;
    inserted.sort_by_key(|b| b.id);
    debug!("inserted {} out of {} blocks", inserted.len(), blocks.len());
    Ok(inserted)
}

/// Latest block with given `number`.
pub(super) async fn get_by_number(
    client: &impl GenericClient,
    number: BlockNumber,
) -> Result<Option<Block>, tokio_postgres::Error> {
    let qry =
        format!("select {COLUMNS} from etl.blocks where number = $1 order by id desc limit 1;");
    client
        .query_opt(&qry, &[&number])
        .await?
        .map(|row| Block::try_from_row(&row))
        .transpose()
}

pub(super) async fn get_by_id(
    client: &impl GenericClient,
    id: BlockId,
) -> Result<Option<Block>, tokio_postgres::Error> {
    let qry = format!("select {COLUMNS} from etl.blocks where id = $1;");
    client
        .query_opt(&qry, &[&id])
        .await?
        .map(|row| Block::try_from_row(&row))
        .transpose()
}

pub(super) async fn get_by_hash(
    client: &impl GenericClient,
    hash: &str,
) -> Result<Option<Block>, tokio_postgres::Error> {
    let qry = format!("select {COLUMNS} from etl.blocks where hash = $1;");
    client
        .query_opt(&qry, &[&hash])
        .await?
        .map(|row| Block::try_from_row(&row))
        .transpose()
}

/// Blocks with id in `from_id..=to_id`, ordered by id.
pub(super) async fn get_range(
    client: &impl GenericClient,
    from_id: BlockId,
    to_id: BlockId,
) -> Result<Vec<Block>, tokio_postgres::Error> {
    let qry = format!(
        "select {COLUMNS} from etl.blocks where id >= $1 and id <= $2 order by id;"
    );
    client
        .query(&qry, &[&from_id, &to_id])
        .await?
        .iter()
        .map(Block::try_from_row)
        .collect()
}

/// At most `limit` blocks with id above `after_id` and not above `max_id`, ordered by id.
pub(super) async fn get_after(
    client: &impl GenericClient,
    after_id: BlockId,
    max_id: Option<BlockId>,
    limit: i64,
) -> Result<Vec<Block>, tokio_postgres::Error> {
    let qry = format!(
        "
        select {COLUMNS}
        from etl.blocks
        where id > $1 and ($2::bigint is null or id <= $2)
        order by id
        limit $3;"
    );
    client
        .query(&qry, &[&after_id, &max_id, &limit])
        .await?
        .iter()
        .map(Block::try_from_row)
        .collect()
}

/// Block with highest number.
pub(super) async fn get_last(
    client: &impl GenericClient,
) -> Result<Option<Block>, tokio_postgres::Error> {
    let qry = format!("select {COLUMNS} from etl.blocks order by number desc, id desc limit 1;");
    client
        .query_opt(&qry, &[])
        .await?
        .map(|row| Block::try_from_row(&row))
        .transpose()
}

/// Delete block with given `hash`.
pub(super) async fn delete(
    client: &impl GenericClient,
    hash: &str,
) -> Result<u64, tokio_postgres::Error> {
    client
        .execute("delete from etl.blocks where hash = $1;", &[&hash])
        .await
}

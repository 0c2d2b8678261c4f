//! SQL builders for the feature pagination queries.
//!
//! All user input is bound as named parameters; only schema identifiers
//! resolved at startup (table, fid and geometry column names) are
//! interpolated.

/// Above this number of R-tree candidates a bbox query switches from the
/// R-tree sidecar index to the compound B-tree index. The R-tree answers
/// small windows in logarithmic time but degrades to a full join for large
/// ones.
pub const BBOX_SIZE_BIG: u32 = 10_000;

/// Suffix of the required compound index on each feature table.
pub const SPATIAL_INDEX_SUFFIX: &str = "_spatial_idx";

/// Single feature lookup.
pub fn single_feature_query(table: &str, fid_column: &str) -> String {
    format!(r#"select * from "{table}" f where f."{fid_column}" = :fid limit 1"#)
}

/// Feature collection page without bbox filtering.
///
/// The `next` arm takes one extra row (`:limit + 1`) so the window's
/// `lag`/`lead` pair answers has-prev/has-next without a second round trip.
pub fn default_query(table: &str, fid_column: &str) -> String {
    format!(
        r#"
with
    next as (select * from "{t}" where "{fid}" >= :fid order by "{fid}" asc limit :limit + 1),
    prev as (select * from "{t}" where "{fid}" < :fid order by "{fid}" desc limit :limit),
    nextprev as (select * from next union all select * from prev),
    nextprevfeat as (select *, lag("{fid}", :limit) over (order by "{fid}") as prevfid,
                             lead("{fid}", :limit) over (order by "{fid}") as nextfid
                     from nextprev)
select * from nextprevfeat where "{fid}" >= :fid limit :limit
"#,
        t = table,
        fid = fid_column,
    )
}

/// Feature collection page with bbox filtering.
///
/// The `bbox_size` probe counts R-tree candidates up to the cutoff; exactly
/// one of the rtree/btree arms is active per query (the other gets
/// `limit 0`). A `st_intersects` predicate provides exact filtering after
/// the index candidates have been pruned.
pub fn bbox_query(table: &str, fid_column: &str, geometry_column: &str) -> String {
    format!(
        r#"
with
     given_bbox as (select geomfromtext(:bboxWkt, :bboxCrs)),
     bbox_size as (select iif(count(id) < {cutoff}, 'small', 'big') as bbox_size
                     from (select id from "rtree_{t}_{geom}"
                           where minx <= :maxx and maxx >= :minx and miny <= :maxy and maxy >= :miny
                           limit {cutoff})),
     next_bbox_rtree as (select f.*
                         from "{t}" f inner join "rtree_{t}_{geom}" rf on f."{fid}" = rf.id
                         where rf.minx <= :maxx and rf.maxx >= :minx and rf.miny <= :maxy and rf.maxy >= :miny
                           and st_intersects((select * from given_bbox), castautomagic(f."{geom}")) = 1
                           and f."{fid}" >= :fid
                         order by f."{fid}" asc
                         limit (select iif(bbox_size == 'small', :limit + 1, 0) from bbox_size)),
     next_bbox_btree as (select f.*
                         from "{t}" f indexed by "{t}{idx}"
                         where f.minx <= :maxx and f.maxx >= :minx and f.miny <= :maxy and f.maxy >= :miny
                           and st_intersects((select * from given_bbox), castautomagic(f."{geom}")) = 1
                           and f."{fid}" >= :fid
                         order by f."{fid}" asc
                         limit (select iif(bbox_size == 'big', :limit + 1, 0) from bbox_size)),
     next as (select * from next_bbox_rtree union all select * from next_bbox_btree),
     prev_bbox_rtree as (select f.*
                         from "{t}" f inner join "rtree_{t}_{geom}" rf on f."{fid}" = rf.id
                         where rf.minx <= :maxx and rf.maxx >= :minx and rf.miny <= :maxy and rf.maxy >= :miny
                           and st_intersects((select * from given_bbox), castautomagic(f."{geom}")) = 1
                           and f."{fid}" < :fid
                         order by f."{fid}" desc
                         limit (select iif(bbox_size == 'small', :limit, 0) from bbox_size)),
     prev_bbox_btree as (select f.*
                         from "{t}" f indexed by "{t}{idx}"
                         where f.minx <= :maxx and f.maxx >= :minx and f.miny <= :maxy and f.maxy >= :miny
                           and st_intersects((select * from given_bbox), castautomagic(f."{geom}")) = 1
                           and f."{fid}" < :fid
                         order by f."{fid}" desc
                         limit (select iif(bbox_size == 'big', :limit, 0) from bbox_size)),
     prev as (select * from prev_bbox_rtree union all select * from prev_bbox_btree),
     nextprev as (select * from next union all select * from prev),
     nextprevfeat as (select *, lag("{fid}", :limit) over (order by "{fid}") as prevfid,
                              lead("{fid}", :limit) over (order by "{fid}") as nextfid
                      from nextprev)
select * from nextprevfeat where "{fid}" >= :fid limit :limit
"#,
        t = table,
        fid = fid_column,
        geom = geometry_column,
        cutoff = BBOX_SIZE_BIG,
        idx = SPATIAL_INDEX_SUFFIX,
    )
}

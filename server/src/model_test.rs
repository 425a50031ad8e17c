use super::*;
use serde_json::json;

fn fields(pairs: &[(&str, serde_json::Value)]) -> Fields {
    pairs.iter().map(|(k, v)| ((*k).to_owned(), v.clone())).collect()
}

fn sticky() -> Fields {
    fields(&[
        (F_TYPE, json!("sticky")),
        (F_X, json!(100.0)),
        (F_Y, json!(200.0)),
        (F_WIDTH, json!(200.0)),
        (F_HEIGHT, json!(200.0)),
        (F_COLOR, json!("#FFEB3B")),
        (F_TEXT, json!("hello")),
    ])
}

// =============================================================================
// validate_create
// =============================================================================

#[test]
fn create_sticky_ok() {
    assert_eq!(validate_create(&sticky()).unwrap(), ObjectType::Sticky);
}

#[test]
fn create_unknown_type_rejected() {
    let mut f = sticky();
    f.insert(F_TYPE.into(), json!("hexagon"));
    assert!(matches!(validate_create(&f), Err(ModelError::UnknownType(_))));
}

#[test]
fn create_missing_type_rejected() {
    let mut f = sticky();
    f.remove(F_TYPE);
    assert!(matches!(validate_create(&f), Err(ModelError::MissingField(F_TYPE))));
}

#[test]
fn create_circle_requires_radius() {
    let f = fields(&[(F_TYPE, json!("circle")), (F_X, json!(0.0)), (F_Y, json!(0.0))]);
    assert!(matches!(validate_create(&f), Err(ModelError::MissingField(F_RADIUS))));

    let f = fields(&[
        (F_TYPE, json!("circle")),
        (F_X, json!(0.0)),
        (F_Y, json!(0.0)),
        (F_RADIUS, json!(50.0)),
    ]);
    assert_eq!(validate_create(&f).unwrap(), ObjectType::Circle);
}

#[test]
fn create_line_requires_points() {
    let f = fields(&[
        (F_TYPE, json!("line")),
        (F_X, json!(10.0)),
        (F_Y, json!(10.0)),
        (F_POINTS, json!([0.0, 0.0, 100.0, 50.0])),
    ]);
    assert_eq!(validate_create(&f).unwrap(), ObjectType::Line);
}

#[test]
fn create_connector_requires_endpoints() {
    let f = fields(&[(F_TYPE, json!("connector")), (F_CONNECTED_FROM, json!("a1b2c3d4"))]);
    assert!(matches!(
        validate_create(&f),
        Err(ModelError::MissingField(F_CONNECTED_TO))
    ));
}

#[test]
fn radius_on_rectangle_is_incompatible() {
    let mut f = sticky();
    f.insert(F_TYPE.into(), json!("rectangle"));
    f.insert(F_RADIUS.into(), json!(10.0));
    assert!(matches!(
        validate_create(&f),
        Err(ModelError::IncompatibleField { field: F_RADIUS, .. })
    ));
}

#[test]
fn font_size_on_sticky_is_incompatible() {
    let mut f = sticky();
    f.insert(F_FONT_SIZE.into(), json!(14.0));
    assert!(matches!(
        validate_create(&f),
        Err(ModelError::IncompatibleField { field: F_FONT_SIZE, .. })
    ));
}

// =============================================================================
// constraints
// =============================================================================

#[test]
fn non_finite_coordinate_rejected() {
    let mut f = sticky();
    f.insert(F_X.into(), json!("NaN-ish"));
    assert!(matches!(validate_create(&f), Err(ModelError::WrongKind(F_X))));
}

#[test]
fn zero_extent_rejected_for_shapes() {
    let mut f = sticky();
    f.insert(F_WIDTH.into(), json!(0.0));
    assert!(matches!(
        validate_create(&f),
        Err(ModelError::NotPositive { field: F_WIDTH })
    ));
}

#[test]
fn negative_radius_rejected() {
    let f = fields(&[
        (F_TYPE, json!("circle")),
        (F_X, json!(0.0)),
        (F_Y, json!(0.0)),
        (F_RADIUS, json!(-5.0)),
    ]);
    assert!(matches!(
        validate_create(&f),
        Err(ModelError::NotPositive { field: F_RADIUS })
    ));
}

#[test]
fn bad_color_rejected() {
    for bad in ["red", "#fff", "#12345g", "123456#"] {
        let mut f = sticky();
        f.insert(F_COLOR.into(), json!(bad));
        assert!(matches!(validate_create(&f), Err(ModelError::BadColor)), "{bad}");
    }
    let mut f = sticky();
    f.insert(F_COLOR.into(), json!("#AbCdEf"));
    assert!(validate_create(&f).is_ok());
}

#[test]
fn overlong_text_rejected() {
    let mut f = sticky();
    f.insert(F_TEXT.into(), json!("x".repeat(10_001)));
    assert!(matches!(validate_create(&f), Err(ModelError::TextTooLong { .. })));
}

#[test]
fn malformed_points_rejected() {
    for bad in [json!([0.0, 1.0]), json!([0.0, 1.0, 2.0, "three"]), json!("0,0,1,1")] {
        let f = fields(&[
            (F_TYPE, json!("line")),
            (F_X, json!(0.0)),
            (F_Y, json!(0.0)),
            (F_POINTS, bad),
        ]);
        assert!(matches!(validate_create(&f), Err(ModelError::BadPoints)));
    }
}

#[test]
fn bad_style_rejected() {
    for bad in [
        json!("solid"),
        json!({"lineStyle": "dotted"}),
        json!({"arrowHead": "yes"}),
        json!({"unexpected": 1}),
    ] {
        let f = fields(&[
            (F_TYPE, json!("connector")),
            (F_CONNECTED_FROM, json!("from1234")),
            (F_CONNECTED_TO, json!("to123456")),
            (F_STYLE, bad),
        ]);
        assert!(matches!(validate_create(&f), Err(ModelError::BadStyle)));
    }

    let f = fields(&[
        (F_TYPE, json!("connector")),
        (F_CONNECTED_FROM, json!("from1234")),
        (F_CONNECTED_TO, json!("to123456")),
        (F_STYLE, json!({"lineStyle": "dashed", "arrowHead": true})),
    ]);
    assert!(validate_create(&f).is_ok());
}

#[test]
fn client_supplied_updated_at_rejected() {
    let mut f = sticky();
    f.insert(F_UPDATED_AT.into(), json!(1_700_000_000_000_i64));
    assert!(matches!(
        validate_create(&f),
        Err(ModelError::ServerStamped(F_UPDATED_AT))
    ));
}

// =============================================================================
// validate_patch
// =============================================================================

#[test]
fn patch_without_type_checks_constraints_only() {
    let f = fields(&[(F_X, json!(500.0)), (F_Y, json!(500.0))]);
    assert!(validate_patch(&f).is_ok());

    let f = fields(&[(F_WIDTH, json!(-1.0))]);
    assert!(matches!(
        validate_patch(&f),
        Err(ModelError::NotPositive { field: F_WIDTH })
    ));
}

#[test]
fn patch_with_type_checks_compatibility() {
    let f = fields(&[(F_TYPE, json!("sticky")), (F_RADIUS, json!(5.0))]);
    assert!(matches!(
        validate_patch(&f),
        Err(ModelError::IncompatibleField { field: F_RADIUS, .. })
    ));
}

// =============================================================================
// geometry
// =============================================================================

#[test]
fn bbox_of_sticky_is_its_rect() {
    let b = world_bbox(&sticky()).unwrap();
    assert_eq!(b, BBox { x: 100.0, y: 200.0, w: 200.0, h: 200.0 });
}

#[test]
fn bbox_of_circle_offsets_center_by_radius() {
    let f = fields(&[
        (F_TYPE, json!("circle")),
        (F_X, json!(100.0)),
        (F_Y, json!(100.0)),
        (F_RADIUS, json!(40.0)),
    ]);
    let b = world_bbox(&f).unwrap();
    assert_eq!(b, BBox { x: 60.0, y: 60.0, w: 80.0, h: 80.0 });
}

#[test]
fn bbox_of_connector_is_none() {
    let f = fields(&[
        (F_TYPE, json!("connector")),
        (F_X, json!(0.0)),
        (F_Y, json!(0.0)),
        (F_CONNECTED_FROM, json!("from1234")),
        (F_CONNECTED_TO, json!("to123456")),
    ]);
    assert!(world_bbox(&f).is_none());
}

#[test]
fn strict_containment_excludes_boundary() {
    let b = BBox { x: 0.0, y: 0.0, w: 100.0, h: 100.0 };
    assert!(b.contains_point_strict(50.0, 50.0));
    assert!(!b.contains_point_strict(0.0, 50.0));
    assert!(!b.contains_point_strict(100.0, 50.0));
    assert!(!b.contains_point_strict(50.0, 0.0));
}

#[test]
fn axis_gaps() {
    let a = BBox { x: 0.0, y: 0.0, w: 100.0, h: 100.0 };
    let b = BBox { x: 150.0, y: 20.0, w: 50.0, h: 50.0 };
    assert!((a.gap_x(&b) - 50.0).abs() < f64::EPSILON);
    assert!((a.gap_y(&b)).abs() < f64::EPSILON);
}

#[test]
fn dangling_connector_detection() {
    let conn = fields(&[
        (F_TYPE, json!("connector")),
        (F_CONNECTED_FROM, json!("aaaa1111")),
        (F_CONNECTED_TO, json!("bbbb2222")),
    ]);
    let both = |id: &str| id == "aaaa1111" || id == "bbbb2222";
    let one = |id: &str| id == "aaaa1111";

    assert!(!connector_is_dangling(&conn, both));
    assert!(connector_is_dangling(&conn, one));
    assert!(connector_is_dangling(&conn, |_| false));

    // A connector missing its endpoint fields can never render.
    let broken = fields(&[(F_TYPE, json!("connector"))]);
    assert!(connector_is_dangling(&broken, |_| true));

    // Non-connectors are never dangling.
    assert!(!connector_is_dangling(&sticky(), |_| false));
}

#[test]
fn connector_endpoint_accessor() {
    let f = fields(&[
        (F_TYPE, json!("connector")),
        (F_CONNECTED_FROM, json!("aaaa1111")),
        (F_CONNECTED_TO, json!("bbbb2222")),
    ]);
    assert_eq!(connector_endpoints(&f), Some(("aaaa1111", "bbbb2222")));
    assert!(connector_endpoints(&sticky()).is_none());
}

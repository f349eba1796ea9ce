use rowbind::{
    Destination, Error, FieldInfo, MappingErrorKind, Model, Record, Row, Rows, SchemaMapper,
    TagDirective, Value, hump_to_underscore, scan, verbatim,
};

#[derive(Record, Debug, Default, Clone, PartialEq)]
pub struct Person {
    pub name: String,
    pub age: i32,
}

#[derive(Record, Debug, Default, Clone, PartialEq)]
pub struct Profile {
    pub title: String,
    pub sex: Option<String>,
    #[orm(embed)]
    person: Person,
}

#[derive(Record, Debug, Default, Clone, PartialEq)]
#[orm(table = "stories")]
pub struct Story {
    pub description: String,
    #[orm("pk")]
    pub id: i64,
    pub zone: String,
    #[orm(embed)]
    profile: Profile,
    #[orm("column:basicla,readonly")]
    pub basic_la: Option<String>,
    #[orm("readonly")]
    pub updated_at: Option<i64>,
    // not exported, not mapped
    cache: Option<String>,
}

fn summary(columns: &[FieldInfo]) -> Vec<(String, Vec<usize>, bool, bool)> {
    columns
        .iter()
        .map(|f| (f.name.clone(), f.index.clone(), f.primary_key, f.read_only))
        .collect()
}

#[test]
fn derivation_is_depth_first_through_embedding() {
    let mapper = SchemaMapper::new("main");
    let story = mapper.load::<Story>().unwrap();
    let expected = vec![
        ("description".to_string(), vec![0], false, false),
        ("id".to_string(), vec![1], true, false),
        ("zone".to_string(), vec![2], false, false),
        ("title".to_string(), vec![3, 0], false, false),
        ("sex".to_string(), vec![3, 1], false, false),
        ("name".to_string(), vec![3, 2, 0], false, false),
        ("age".to_string(), vec![3, 2, 1], false, false),
        ("basicla".to_string(), vec![4], false, true),
        ("updated_at".to_string(), vec![5], false, true),
    ];
    assert_eq!(summary(story.columns()), expected);
    assert_eq!(Story::TABLE_NAME, "stories");

    // every column resolves back to the same field
    for field in story.columns() {
        assert_eq!(story.field(&field.name), Some(field));
    }
    assert_eq!(story.primary_key().unwrap().name, "id");
}

#[test]
fn mappers_are_cached_per_storage_and_type() {
    let mapper = SchemaMapper::new("main");
    let first = mapper.load::<Story>().unwrap();
    let second = mapper.load::<Story>().unwrap();
    assert!(std::sync::Arc::ptr_eq(&first, &second));

    let other = SchemaMapper::with_naming("legacy", verbatim);
    let legacy = other.load::<Story>().unwrap();
    assert!(!std::sync::Arc::ptr_eq(&first, &legacy));
    assert_eq!(
        mapper.columns::<Person>().unwrap(),
        vec!["name".to_string(), "age".to_string()]
    );
}

#[test]
fn cache_tolerates_concurrent_first_loads() {
    let mapper = SchemaMapper::new("main");
    std::thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                let story = mapper.load::<Story>().unwrap();
                assert_eq!(story.columns().len(), 9);
            });
        }
    });
}

#[test]
fn naming_transform_cases() {
    assert_eq!(hump_to_underscore("ID"), "id");
    assert_eq!(hump_to_underscore("FuncName"), "func_name");
    assert_eq!(hump_to_underscore("titleName"), "title_name");
    assert_eq!(
        hump_to_underscore("FFFFuuuuAAAAAAABBBaaaCccc"),
        "ffffuuuu_aaaaaaabbbaaa_cccc"
    );
    for name in ["func_name", "title_name", "id"] {
        assert_eq!(hump_to_underscore(name), name);
    }
}

#[test]
fn tag_parser_degrades_to_defaults() {
    let tag = TagDirective::parse(Some("column:first, column:second,pk,bogus:1,readonly"));
    assert!(tag.has_column);
    assert_eq!(tag.column, "second");
    assert!(tag.primary_key);
    assert!(tag.read_only);
    assert_eq!(TagDirective::parse(None), TagDirective::default());
    assert_eq!(TagDirective::parse(Some(",,:")), TagDirective::default());
}

#[test]
fn derived_accessors_follow_index_paths() {
    let mut story = Story::default();
    story.set_field(&[3, 2, 0], &Value::from("ada")).unwrap();
    story.set_field(&[1], &Value::BigInt(9)).unwrap();
    assert_eq!(story.get_field(&[3, 2, 0]).unwrap(), Value::from("ada"));
    assert_eq!(story.id, 9);

    // the unexported field has no accessor
    assert!(matches!(story.get_field(&[6]), Err(Error::Shape(_))));
    assert!(story.cache.is_none());
    assert!(matches!(story.get_field(&[3, 9]), Err(Error::Shape(_))));
}

#[test]
fn scan_fills_records_by_column_name() {
    let mapper = SchemaMapper::new("main");
    let columns = vec!["age".to_string(), "name".to_string()];
    let rows = vec![
        Row::new(columns.clone(), vec![Value::Int(36), Value::from("ada")]),
        Row::new(columns.clone(), vec![Value::Int(41), Value::from("bob")]),
    ];

    let mut people: Vec<Person> = Vec::new();
    scan(&mapper, Destination::Many(&mut people), &mut Rows::new(columns.clone(), rows.clone())).unwrap();
    assert_eq!(
        people,
        vec![
            Person { name: "ada".into(), age: 36 },
            Person { name: "bob".into(), age: 41 },
        ]
    );

    let mut boxed: Vec<Box<Person>> = Vec::new();
    scan(&mapper, Destination::Boxed(&mut boxed), &mut Rows::new(columns.clone(), rows.clone())).unwrap();
    assert_eq!(boxed.len(), 2);

    let mut one = Person::default();
    scan(&mapper, Destination::One(&mut one), &mut Rows::new(columns, rows)).unwrap();
    assert_eq!(one.name, "ada");
}

#[test]
fn scan_of_no_rows_leaves_destinations_alone() {
    let mapper = SchemaMapper::new("main");
    let mut one = Person { name: "kept".into(), age: 1 };
    scan(&mapper, Destination::One(&mut one), &mut Rows::new(vec!["name".into()], Vec::new())).unwrap();
    assert_eq!(one, Person { name: "kept".into(), age: 1 });

    let mut many: Vec<Person> = Vec::new();
    scan(&mapper, Destination::Many(&mut many), &mut Rows::default()).unwrap();
    assert!(many.is_empty());
}

#[test]
fn unmapped_result_column_fails_the_scan() {
    let mapper = SchemaMapper::new("main");
    let columns = vec!["name".to_string(), "nickname".to_string()];
    let rows = vec![Row::new(columns.clone(), vec![Value::from("ada"), Value::from("a")])];
    let mut people: Vec<Person> = Vec::new();
    let err = scan(&mapper, Destination::Many(&mut people), &mut Rows::new(columns, rows)).unwrap_err();
    assert_eq!(err.mapping_kind(), Some(MappingErrorKind::UnknownColumn));
    assert!(people.is_empty());
}

#[derive(Record, Debug, Default)]
#[orm(table = "dupes")]
pub struct Dupes {
    pub name: String,
    #[orm("column:name")]
    pub alias: String,
}

#[test]
fn duplicate_columns_are_rejected() {
    let err = SchemaMapper::new("main").load::<Dupes>().unwrap_err();
    assert_eq!(err.mapping_kind(), Some(MappingErrorKind::DuplicateColumn));
}

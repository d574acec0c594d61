use graft_orm::prelude::*;
use tracing::info;

// 1. Parent Model
#[derive(Model, Debug, Default)]
struct Classroom {
    id: i64,
    name: String,
    #[has_many(Student, on_delete = cascade)]
    students: Option<Vec<Student>>,
}

// 2. Child Model, with a second association through a join table
#[derive(Model, Debug, Default)]
struct Student {
    id: i64,
    name: String,
    age: i32,
    #[belongs_to(Classroom)]
    classroom: Option<Box<Classroom>>,
    #[many_to_many(Club)]
    clubs: Option<Vec<Club>>,
}

#[derive(Model, Debug, Default)]
struct Club {
    id: i64,
    name: String,
}

fn club(name: &str) -> Club {
    Club {
        name: name.to_owned(),
        ..Default::default()
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,graft_core=debug".into()),
        )
        .with_target(false)
        .init();

    let config = GraftConfig::from_env()?;
    let db = Graft::connect(config).await?;

    // A. Sync Tables
    db.sync::<Classroom>().await?;
    db.sync::<Student>().await?;
    db.sync::<Club>().await?;

    // B. Save a whole graph in one call
    let mut room = Classroom {
        name: "7B".to_owned(),
        students: Some(vec![
            Student {
                name: "Alice".to_owned(),
                age: 13,
                clubs: Some(vec![club("Chess"), club("Robotics")]),
                ..Default::default()
            },
            Student {
                name: "Bob".to_owned(),
                age: 14,
                ..Default::default()
            },
        ]),
        ..Default::default()
    };
    room.save(&db).await?;
    info!(classroom = room.id, "saved classroom with its students");

    // C. Eager load both directions
    let students = Student::query(&db)
        .include("classroom")
        .include("clubs")
        .order("name")
        .all()
        .await?;
    for student in &students {
        let classroom = student.classroom.as_ref().map(|c| c.name.as_str()).unwrap_or("-");
        let clubs: Vec<&str> = student
            .clubs
            .iter()
            .flatten()
            .map(|c| c.name.as_str())
            .collect();
        println!("- {} ({}) in {} clubs {:?}", student.name, student.age, classroom, clubs);
    }

    // D. Update skips zero values unless asked
    let birthday = Student {
        age: 15,
        ..Default::default()
    };
    let bob = students.iter().find(|s| s.name == "Bob").map(|s| s.id).unwrap_or_default();
    db.update(&birthday, bob).await?;

    // E. Cascade delete
    let removed = room.delete(&db).await?;
    println!("deleted {} rows, {} students left", removed, db.count::<Student>().await?);
    println!("clubs survive: {}", db.count::<Club>().await?);

    Ok(())
}

use crate::errors::{AppError, AppResult};
use crate::models::{FlexFieldFolder, FlexFieldObject, ObjectName, Project};
use crate::store::{FlexFieldObjectStore, FolderStore, ImageUsage, ProjectStore, TagStore};
use crate::tags::tag_key;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

const SCHEMA_SQL: &str = include_str!("schema.sql");

const FOLDER_COLUMNS: &str = "id, project_id, parent_folder_id, name, description, image_file";

#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl Database {
    pub fn new(path: &Path, default_project_name: &str) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        conn.execute_batch(SCHEMA_SQL).map_err(AppError::from)?;

        let db = Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        };
        db.ensure_default_project(default_project_name)?;

        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Folder store scoped to one entity kind.
    pub fn folders(db: &Arc<Self>, kind: &str) -> SqliteFolderStore {
        SqliteFolderStore {
            db: db.clone(),
            kind: kind.to_string(),
        }
    }

    /// Object store for one collection, e.g. `npc` or `npc_templates`.
    pub fn objects(db: &Arc<Self>, collection: &str) -> SqliteObjectStore {
        SqliteObjectStore {
            db: db.clone(),
            collection: collection.to_string(),
        }
    }

    pub fn tags(db: &Arc<Self>, kind: &str) -> SqliteTagStore {
        SqliteTagStore {
            db: db.clone(),
            kind: kind.to_string(),
        }
    }

    pub fn default_project(&self) -> AppResult<Project> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, name, is_default FROM projects WHERE is_default = 1 ORDER BY id LIMIT 1",
            [],
            |row| {
                Ok(Project {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    is_default: row.get::<_, i64>(2)? != 0,
                })
            },
        )
        .optional()?
        .ok_or_else(|| AppError::NotFound("default project is missing".to_string()))
    }

    pub fn is_image_referenced(&self, image_file: &str) -> AppResult<bool> {
        let conn = self.lock()?;
        let used: i64 = conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM flex_field_folders WHERE image_file = ?1)
                 OR EXISTS (SELECT 1 FROM flex_field_objects WHERE image_file = ?1)",
            [image_file],
            |row| row.get(0),
        )?;
        Ok(used != 0)
    }

    fn ensure_default_project(&self, name: &str) -> AppResult<()> {
        let conn = self.lock()?;
        let existing: i64 = conn.query_row(
            "SELECT COUNT(*) FROM projects WHERE is_default = 1",
            [],
            |row| row.get(0),
        )?;
        if existing > 0 {
            return Ok(());
        }
        conn.execute(
            "INSERT INTO projects (id, name, is_default) VALUES (?1, ?2, 1)",
            params![Uuid::new_v4().to_string(), name],
        )?;
        tracing::info!(project = name, "seeded default project");
        Ok(())
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("database mutex poisoned".to_string()))
    }

    // ─── Folders ────────────────────────────────────────────────────────────

    fn get_folder(&self, kind: &str, id: &str) -> AppResult<Option<FlexFieldFolder>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {} FROM flex_field_folders WHERE kind = ?1 AND id = ?2", FOLDER_COLUMNS),
            params![kind, id],
            parse_folder_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    fn list_folders(
        &self,
        kind: &str,
        scope_column: &str,
        scope_value: &str,
        root_only: bool,
        start: usize,
        page_size: usize,
    ) -> AppResult<Vec<FlexFieldFolder>> {
        let conn = self.lock()?;
        let root_clause = if root_only { " AND parent_folder_id = ''" } else { "" };
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM flex_field_folders
             WHERE kind = ?1 AND {} = ?2{}
             ORDER BY name COLLATE NOCASE, id
             LIMIT ?3 OFFSET ?4",
            FOLDER_COLUMNS, scope_column, root_clause
        ))?;
        let folders = stmt
            .query_map(
                params![kind, scope_value, page_size as i64, start as i64],
                parse_folder_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(folders)
    }

    fn count_folders(&self, kind: &str, scope_column: &str, scope_value: &str, root_only: bool) -> AppResult<u64> {
        let conn = self.lock()?;
        let root_clause = if root_only { " AND parent_folder_id = ''" } else { "" };
        let count: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM flex_field_folders WHERE kind = ?1 AND {} = ?2{}",
                scope_column, root_clause
            ),
            params![kind, scope_value],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    fn insert_folder(&self, kind: &str, mut folder: FlexFieldFolder) -> AppResult<FlexFieldFolder> {
        if folder.id.is_empty() {
            folder.id = Uuid::new_v4().to_string();
        }
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO flex_field_folders (id, kind, project_id, parent_folder_id, name, description, image_file)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                folder.id,
                kind,
                folder.project_id,
                folder.parent_folder_id,
                folder.name,
                folder.description,
                folder.image_file,
            ],
        )?;
        Ok(folder)
    }

    fn save_folder(&self, kind: &str, folder: &FlexFieldFolder) -> AppResult<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE flex_field_folders
             SET project_id = ?1, parent_folder_id = ?2, name = ?3, description = ?4, image_file = ?5
             WHERE kind = ?6 AND id = ?7",
            params![
                folder.project_id,
                folder.parent_folder_id,
                folder.name,
                folder.description,
                folder.image_file,
                kind,
                folder.id,
            ],
        )?;
        if changed == 0 {
            return Err(AppError::NotFound(format!("Folder '{}' not found", folder.id)));
        }
        Ok(())
    }

    fn remove_folder(&self, kind: &str, id: &str) -> AppResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM flex_field_folders WHERE kind = ?1 AND id = ?2",
            params![kind, id],
        )?;
        Ok(())
    }

    // ─── Objects ────────────────────────────────────────────────────────────

    fn get_object(&self, collection: &str, id: &str) -> AppResult<Option<FlexFieldObject>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, document_json FROM flex_field_objects WHERE collection = ?1 AND id = ?2",
            params![collection, id],
            parse_object_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    fn query_objects(&self, sql: &str, values: &[&dyn rusqlite::ToSql]) -> AppResult<Vec<FlexFieldObject>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let objects = stmt
            .query_map(values, parse_object_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(objects)
    }

    fn count_objects(&self, sql: &str, values: &[&dyn rusqlite::ToSql]) -> AppResult<u64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(sql, values, |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    fn insert_object(&self, collection: &str, mut object: FlexFieldObject) -> AppResult<FlexFieldObject> {
        if object.id.is_empty() {
            object.id = Uuid::new_v4().to_string();
        }
        let document = serde_json::to_string(&object)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO flex_field_objects
               (id, collection, project_id, parent_folder_id, template_id, name, image_file, document_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                object.id,
                collection,
                object.project_id,
                object.parent_folder_id,
                object.template_id,
                object.name,
                object.image_file,
                document,
            ],
        )?;
        replace_object_tags(&tx, collection, &object)?;
        tx.commit()?;
        Ok(object)
    }

    fn save_object(&self, collection: &str, object: &FlexFieldObject) -> AppResult<()> {
        let document = serde_json::to_string(object)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let changed = tx.execute(
            "UPDATE flex_field_objects
             SET project_id = ?1, parent_folder_id = ?2, template_id = ?3, name = ?4, image_file = ?5,
                 document_json = ?6
             WHERE collection = ?7 AND id = ?8",
            params![
                object.project_id,
                object.parent_folder_id,
                object.template_id,
                object.name,
                object.image_file,
                document,
                collection,
                object.id,
            ],
        )?;
        if changed == 0 {
            return Err(AppError::NotFound(format!("Object '{}' not found", object.id)));
        }
        replace_object_tags(&tx, collection, object)?;
        tx.commit()?;
        Ok(())
    }

    fn remove_object(&self, collection: &str, id: &str) -> AppResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM flex_field_object_tags WHERE collection = ?1 AND object_id = ?2",
            params![collection, id],
        )?;
        tx.execute(
            "DELETE FROM flex_field_objects WHERE collection = ?1 AND id = ?2",
            params![collection, id],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn object_names(&self, collection: &str, ids: &[String]) -> AppResult<Vec<ObjectName>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id, name FROM flex_field_objects WHERE collection = ?1 AND id = ?2")?;
        let mut names = Vec::with_capacity(ids.len());
        for id in ids {
            let found = stmt
                .query_row(params![collection, id], |row| {
                    Ok(ObjectName {
                        id: row.get(0)?,
                        name: row.get(1)?,
                    })
                })
                .optional()?;
            if let Some(name) = found {
                names.push(name);
            }
        }
        Ok(names)
    }

    fn tag_in_use(&self, collection: &str, tag: &str) -> AppResult<bool> {
        let conn = self.lock()?;
        let used: i64 = conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM flex_field_object_tags WHERE collection = ?1 AND tag_key = ?2)",
            params![collection, tag_key(tag)],
            |row| row.get(0),
        )?;
        Ok(used != 0)
    }

    // ─── Tag vocabulary ─────────────────────────────────────────────────────

    fn list_tags(&self, kind: &str) -> AppResult<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT tag FROM flex_field_tags WHERE kind = ?1 ORDER BY tag_key")?;
        let tags = stmt
            .query_map([kind], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tags)
    }

    fn insert_tag(&self, kind: &str, tag: &str) -> AppResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO flex_field_tags (kind, tag, tag_key) VALUES (?1, ?2, ?3)",
            params![kind, tag, tag_key(tag)],
        )?;
        Ok(())
    }

    fn remove_tag(&self, kind: &str, tag: &str) -> AppResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM flex_field_tags WHERE kind = ?1 AND tag_key = ?2",
            params![kind, tag_key(tag)],
        )?;
        Ok(())
    }
}

#[async_trait]
impl ProjectStore for Database {
    async fn get_default_project(&self) -> AppResult<Project> {
        self.default_project()
    }
}

#[async_trait]
impl ImageUsage for Database {
    async fn is_image_used(&self, name: &str) -> AppResult<bool> {
        self.is_image_referenced(name)
    }
}

#[derive(Debug, Clone)]
pub struct SqliteFolderStore {
    db: Arc<Database>,
    kind: String,
}

#[async_trait]
impl FolderStore for SqliteFolderStore {
    async fn get_folder_by_id(&self, id: &str) -> AppResult<Option<FlexFieldFolder>> {
        self.db.get_folder(&self.kind, id)
    }

    async fn get_root_folders(
        &self,
        project_id: &str,
        start: usize,
        page_size: usize,
    ) -> AppResult<Vec<FlexFieldFolder>> {
        self.db
            .list_folders(&self.kind, "project_id", project_id, true, start, page_size)
    }

    async fn get_root_folder_count(&self, project_id: &str) -> AppResult<u64> {
        self.db.count_folders(&self.kind, "project_id", project_id, true)
    }

    async fn get_child_folders(
        &self,
        parent_id: &str,
        start: usize,
        page_size: usize,
    ) -> AppResult<Vec<FlexFieldFolder>> {
        self.db
            .list_folders(&self.kind, "parent_folder_id", parent_id, false, start, page_size)
    }

    async fn get_child_folder_count(&self, parent_id: &str) -> AppResult<u64> {
        self.db.count_folders(&self.kind, "parent_folder_id", parent_id, false)
    }

    async fn create_folder(&self, folder: FlexFieldFolder) -> AppResult<FlexFieldFolder> {
        self.db.insert_folder(&self.kind, folder)
    }

    async fn update_folder(&self, folder: &FlexFieldFolder) -> AppResult<()> {
        self.db.save_folder(&self.kind, folder)
    }

    async fn delete_folder(&self, folder: &FlexFieldFolder) -> AppResult<()> {
        self.db.remove_folder(&self.kind, &folder.id)
    }
}

#[derive(Debug, Clone)]
pub struct SqliteObjectStore {
    db: Arc<Database>,
    collection: String,
}

#[async_trait]
impl FlexFieldObjectStore for SqliteObjectStore {
    async fn get_by_id(&self, id: &str) -> AppResult<Option<FlexFieldObject>> {
        self.db.get_object(&self.collection, id)
    }

    async fn get_in_root_folder(
        &self,
        project_id: &str,
        start: usize,
        page_size: usize,
    ) -> AppResult<Vec<FlexFieldObject>> {
        let (limit, offset) = (page_size as i64, start as i64);
        self.db.query_objects(
            "SELECT id, document_json FROM flex_field_objects
             WHERE collection = ?1 AND project_id = ?2 AND parent_folder_id = ''
             ORDER BY name COLLATE NOCASE, id LIMIT ?3 OFFSET ?4",
            params![self.collection, project_id, limit, offset],
        )
    }

    async fn get_in_root_folder_count(&self, project_id: &str) -> AppResult<u64> {
        self.db.count_objects(
            "SELECT COUNT(*) FROM flex_field_objects
             WHERE collection = ?1 AND project_id = ?2 AND parent_folder_id = ''",
            params![self.collection, project_id],
        )
    }

    async fn get_in_folder(
        &self,
        folder_id: &str,
        start: usize,
        page_size: usize,
    ) -> AppResult<Vec<FlexFieldObject>> {
        let (limit, offset) = (page_size as i64, start as i64);
        self.db.query_objects(
            "SELECT id, document_json FROM flex_field_objects
             WHERE collection = ?1 AND parent_folder_id = ?2
             ORDER BY name COLLATE NOCASE, id LIMIT ?3 OFFSET ?4",
            params![self.collection, folder_id, limit, offset],
        )
    }

    async fn get_in_folder_count(&self, folder_id: &str) -> AppResult<u64> {
        self.db.count_objects(
            "SELECT COUNT(*) FROM flex_field_objects WHERE collection = ?1 AND parent_folder_id = ?2",
            params![self.collection, folder_id],
        )
    }

    async fn search(
        &self,
        project_id: &str,
        pattern: &str,
        start: usize,
        page_size: usize,
    ) -> AppResult<Vec<FlexFieldObject>> {
        let like = like_pattern(pattern);
        let key_like = tag_key(&like);
        let (limit, offset) = (page_size as i64, start as i64);
        self.db.query_objects(
            "SELECT o.id, o.document_json FROM flex_field_objects o
             WHERE o.collection = ?1 AND o.project_id = ?2
               AND (o.name LIKE ?3 ESCAPE '\\'
                    OR EXISTS (SELECT 1 FROM flex_field_object_tags t
                               WHERE t.object_id = o.id AND t.tag_key LIKE ?4 ESCAPE '\\'))
             ORDER BY o.name COLLATE NOCASE, o.id LIMIT ?5 OFFSET ?6",
            params![self.collection, project_id, like, key_like, limit, offset],
        )
    }

    async fn search_count(&self, project_id: &str, pattern: &str) -> AppResult<u64> {
        let like = like_pattern(pattern);
        let key_like = tag_key(&like);
        self.db.count_objects(
            "SELECT COUNT(*) FROM flex_field_objects o
             WHERE o.collection = ?1 AND o.project_id = ?2
               AND (o.name LIKE ?3 ESCAPE '\\'
                    OR EXISTS (SELECT 1 FROM flex_field_object_tags t
                               WHERE t.object_id = o.id AND t.tag_key LIKE ?4 ESCAPE '\\'))",
            params![self.collection, project_id, like, key_like],
        )
    }

    async fn resolve_names(&self, ids: &[String]) -> AppResult<Vec<ObjectName>> {
        self.db.object_names(&self.collection, ids)
    }

    async fn get_by_template_id(&self, template_id: &str) -> AppResult<Vec<FlexFieldObject>> {
        self.db.query_objects(
            "SELECT id, document_json FROM flex_field_objects
             WHERE collection = ?1 AND template_id = ?2 ORDER BY id",
            params![self.collection, template_id],
        )
    }

    async fn create(&self, object: FlexFieldObject) -> AppResult<FlexFieldObject> {
        self.db.insert_object(&self.collection, object)
    }

    async fn update(&self, object: &FlexFieldObject) -> AppResult<()> {
        self.db.save_object(&self.collection, object)
    }

    async fn delete(&self, object: &FlexFieldObject) -> AppResult<()> {
        self.db.remove_object(&self.collection, &object.id)
    }

    async fn any_using_tag(&self, tag: &str) -> AppResult<bool> {
        self.db.tag_in_use(&self.collection, tag)
    }
}

#[derive(Debug, Clone)]
pub struct SqliteTagStore {
    db: Arc<Database>,
    kind: String,
}

#[async_trait]
impl TagStore for SqliteTagStore {
    async fn get_all_tags(&self) -> AppResult<Vec<String>> {
        self.db.list_tags(&self.kind)
    }

    async fn add_tag(&self, tag: &str) -> AppResult<()> {
        self.db.insert_tag(&self.kind, tag)
    }

    async fn delete_tag(&self, tag: &str) -> AppResult<()> {
        self.db.remove_tag(&self.kind, tag)
    }
}

fn replace_object_tags(conn: &Connection, collection: &str, object: &FlexFieldObject) -> AppResult<()> {
    conn.execute(
        "DELETE FROM flex_field_object_tags WHERE collection = ?1 AND object_id = ?2",
        params![collection, object.id],
    )?;
    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO flex_field_object_tags (collection, object_id, tag, tag_key)
         VALUES (?1, ?2, ?3, ?4)",
    )?;
    for tag in &object.tags {
        stmt.execute(params![collection, object.id, tag, tag_key(tag)])?;
    }
    Ok(())
}

fn parse_folder_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FlexFieldFolder> {
    Ok(FlexFieldFolder {
        id: row.get(0)?,
        project_id: row.get(1)?,
        parent_folder_id: row.get(2)?,
        name: row.get(3)?,
        description: row.get(4)?,
        image_file: row.get(5)?,
    })
}

fn parse_object_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FlexFieldObject> {
    let id: String = row.get(0)?;
    let raw: String = row.get(1)?;
    let mut object: FlexFieldObject = serde_json::from_str(&raw).map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(error))
    })?;
    object.id = id;
    Ok(object)
}

fn like_pattern(pattern: &str) -> String {
    let mut escaped = String::with_capacity(pattern.len() + 2);
    escaped.push('%');
    for ch in pattern.trim().chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

/// Terminal strings for OrangeUploader.
/// Locale can be selected via the `--locale` CLI flag (e.g. `--locale zh`).
use crate::core::model::ItemStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Locale {
    #[default]
    En,
    Zh,
}

impl Locale {
    pub fn from_str(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "zh" | "zh-cn" | "zh_cn" | "zh-hans" | "zh-tw" | "zh_tw" => Self::Zh,
            _ => Self::En,
        }
    }
}

pub struct Messages {
    pub signed_in: &'static str,
    pub auth_failed: &'static str,
    pub queue_started: &'static str,
    pub queue_finished: &'static str,
    pub nothing_to_upload: &'static str,
    pub summary_header: &'static str,
    pub history_empty: &'static str,
    pub status_queued: &'static str,
    pub status_uploading: &'static str,
    pub status_done: &'static str,
    pub status_error: &'static str,
    pub status_skipped: &'static str,
    pub error_prefix: &'static str,
    pub info_prefix: &'static str,
}

impl Messages {
    pub fn status_label(&self, status: ItemStatus) -> &'static str {
        match status {
            ItemStatus::Queued => self.status_queued,
            ItemStatus::Uploading => self.status_uploading,
            ItemStatus::Done => self.status_done,
            ItemStatus::Error => self.status_error,
            ItemStatus::Skipped => self.status_skipped,
        }
    }
}

pub static EN: Messages = Messages {
    signed_in: "Signed in",
    auth_failed: "Auth failed",
    queue_started: "Upload started",
    queue_finished: "Upload finished",
    nothing_to_upload: "Nothing to upload",
    summary_header: "Summary",
    history_empty: "No uploads recorded",
    status_queued: "queued",
    status_uploading: "uploading",
    status_done: "done",
    status_error: "error",
    status_skipped: "skipped",
    error_prefix: "ERR",
    info_prefix: "INFO",
};

pub static ZH: Messages = Messages {
    signed_in: "已登录",
    auth_failed: "登录失败",
    queue_started: "上传已开始",
    queue_finished: "上传已结束",
    nothing_to_upload: "没有可上传的文件",
    summary_header: "摘要",
    history_empty: "暂无上传记录",
    status_queued: "排队中",
    status_uploading: "上传中",
    status_done: "完成",
    status_error: "失败",
    status_skipped: "已跳过",
    error_prefix: "错误",
    info_prefix: "信息",
};

pub fn get_messages(locale: Locale) -> &'static Messages {
    match locale {
        Locale::En => &EN,
        Locale::Zh => &ZH,
    }
}

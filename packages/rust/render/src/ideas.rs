//! Actionable follow-up ideas, picked by topic keywords.

/// At most this many ideas per entry.
pub const MAX_IDEAS: usize = 3;

struct Topic {
    keywords: &'static [&'static str],
    ideas: [&'static str; 3],
}

const TOPICS: &[Topic] = &[
    Topic {
        keywords: &["agent", "moltbot", "clawdbot", "automation", "workflow", "自動化", "工作流", "智能體"],
        ideas: [
            "把這個流程做成定時任務：定期抓資料、產生摘要、寫入 git，形成固定節奏。",
            "把流程拆成兩段：先產生快取，再準點發送或寫入，避免 API 抖動影響準時性。",
            "把輸出改成可機器解析的格式（JSON 或固定段落），方便後續彙整與查詢。",
        ],
    },
    Topic {
        keywords: &["kubernetes", "k8s", "cni", "etcd", "helm", "kubelet", "叢集", "集群", "容器"],
        ideas: [
            "建立每日 K8s 健康巡檢：節點資源、Pod 重啟、事件 top N，產出清單與建議動作。",
            "針對 CNI 與網路問題，彙整最近 24 小時的錯誤關鍵字（conntrack、MTU、timeout）並附定位指令。",
            "把排障步驟寫成 SOP 頁面，每次遇到新問題就增量補齊，commit 當作學習日誌。",
        ],
    },
    Topic {
        keywords: &["storage", "minio", "s3", "erasure", "healing", "ceph", "zfs", "儲存", "存儲"],
        ideas: [
            "把錯誤日誌關鍵字對應到原因與 SOP，整理成固定模板，遇到新錯誤就補一頁。",
            "把 heal 或掃描結果以 JSON lines 落盤，定期轉成「今日處理清單與失敗清單」。",
            "針對特定 bucket 或 prefix 建立一鍵檢查腳本與結果解析，避免全站掃描。",
        ],
    },
    Topic {
        keywords: &["vix", "nasdaq", "earnings", "macro", "gold", "silver", "bitcoin", "btc", "market", "財經", "市場"],
        ideas: [
            "把 VIX、金銀、BTC 做成固定的風險儀表板段落：數值、變化、三行解讀與事件連結。",
            "把重大事件（財報、Fed、地緣政治）整理成「事件與資產反應」對照表，累積成研究筆記。",
            "把資料抓取與格式化獨立成工具，報告只負責解讀，降低維護成本。",
        ],
    },
];

const FALLBACK: [&str; 3] = [
    "把這篇貼文的想法收斂成一個可重複的自動化流程，先做每天一次的最小版本。",
    "把輸出固定成 Markdown 模板（標題、重點、下一步），才能穩定累積成可搜尋的知識庫。",
    "不確定的地方先記下待辦與可執行的驗證指令，讓後續能快速補完。",
];

/// Up to [`MAX_IDEAS`] zh-Hant ideas for `text`, in topic order.
pub fn suggest_ideas(text: &str) -> Vec<String> {
    let text = text.to_lowercase();
    let mut ideas: Vec<&str> = Vec::new();
    for topic in TOPICS {
        if topic.keywords.iter().any(|k| text.contains(k)) {
            for idea in topic.ideas {
                if !ideas.contains(&idea) {
                    ideas.push(idea);
                }
            }
        }
    }
    if ideas.is_empty() {
        ideas.extend(FALLBACK);
    }
    ideas.into_iter().take(MAX_IDEAS).map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_keywords_pick_ideas() {
        let ideas = suggest_ideas("Upgrading our K8s cluster with Helm");
        assert_eq!(ideas.len(), 3);
        assert!(ideas[0].contains("K8s"));
    }

    #[test]
    fn first_matching_topic_leads() {
        let ideas = suggest_ideas("An agent that watches MinIO healing");
        assert_eq!(ideas.len(), MAX_IDEAS);
        assert!(ideas[0].contains("定時任務"));
    }

    #[test]
    fn unrelated_text_gets_fallback() {
        let ideas = suggest_ideas("a poem about autumn");
        assert_eq!(ideas, FALLBACK.map(str::to_string).to_vec());
    }
}
